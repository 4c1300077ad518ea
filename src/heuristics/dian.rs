use super::{ContributorType, VendorInfo};
use regex::Regex;

/// Fixed label that precedes the referenced invoice on a debit note.
const REFERENCE_LABEL: &str = "Factura Electrónica";

/// Banner lines printed at the top of every debit-note page.
const BANNER_LINES: usize = 2;

/// Page separator in pdf-extract output.
const PAGE_BREAK: char = '\x0c';

// ---------------------------------------------------------------------------
// Issuer block
// ---------------------------------------------------------------------------

pub fn extract_vendor_info(text: &str) -> VendorInfo {
    let mut info = VendorInfo::default();

    let Some(section) = vendor_section(text) else {
        return info;
    };

    let contributor_re = Regex::new(r"(?i)tipo\s*de\s*contribuyente").unwrap();
    let department_re = Regex::new(r"(?i)departamento").unwrap();
    let regime_re = Regex::new(r"(?i)r[eé]g[ií]men\s*(f[ií]scal|tributario)?").unwrap();
    let regime_code_re = Regex::new(r"([A-Za-z]-\d+(-[A-Za-z]+)?)").unwrap();

    // Each label is independent; the first occurrence of each wins.
    for line in section.lines() {
        if info.contributor_type.is_none() && contributor_re.is_match(line) {
            if let Some(value) = value_after_colon(line) {
                info.contributor_type = Some(ContributorType::classify(value));
            }
        }

        if info.department.is_none() && department_re.is_match(line) {
            info.department = value_after_colon(line).map(str::to_string);
        }

        if info.tax_regime.is_none() && regime_re.is_match(line) {
            if let Some(value) = value_after_colon(line) {
                info.tax_regime = Some(
                    regime_code_re
                        .captures(value)
                        .map(|c| c[1].to_string())
                        .unwrap_or_else(|| value.to_string()),
                );
            }
        }
    }

    info
}

/// Text between the issuer heading and the buyer heading (or the end).
fn vendor_section(text: &str) -> Option<&str> {
    let re = Regex::new(
        r"(?is)Datos del (?:Emisor\s*/\s*Vendedor|vendedor)(.*?)(?:Datos del Adquiri?ente\s*/\s*Comprador|$)",
    )
    .ok()?;
    re.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str())
}

/// Everything after the first colon, trimmed. `None` when there is no colon.
fn value_after_colon(line: &str) -> Option<&str> {
    line.split_once(':').map(|(_, v)| v.trim())
}

// ---------------------------------------------------------------------------
// Scalar fields
// ---------------------------------------------------------------------------

/// The value may sit on the line after the label.
pub fn extract_payment_method(text: &str) -> Option<String> {
    let re = Regex::new(r"(?i)Forma de pago:\s*(.*)").ok()?;
    let value = re.captures(text)?[1].trim().to_string();
    (!value.is_empty()).then_some(value)
}

/// "Total Bruto Factura 1.250.000,50" becomes "1250000.50".
pub fn extract_gross_total(text: &str) -> Option<String> {
    let re = Regex::new(r"(?i)Total Bruto Factura\s*([\d.,]+)").ok()?;
    let cap = re.captures(text)?;
    Some(cap[1].replace('.', "").replace(',', "."))
}

/// The invoice a debit note points at: the first token after the fixed label.
/// The banner on top of each page is not part of the body.
pub fn extract_referenced_invoice(text: &str) -> Option<String> {
    text.split(PAGE_BREAK).find_map(|page| {
        page.lines()
            .filter(|line| !line.trim().is_empty())
            .skip(BANNER_LINES)
            .find_map(|line| {
                let (_, after) = line.split_once(REFERENCE_LABEL)?;
                after.split_whitespace().next().map(str::to_string)
            })
    })
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// Scan the text layout as a table: lines are rows, runs separated by a tab or
/// two or more spaces are cells. The description is the cell right below the
/// first cell that mentions "Descri".
pub fn extract_product_description(text: &str) -> Option<String> {
    let cell_sep = Regex::new(r"\t+|\s{2,}").ok()?;

    let rows: Vec<Vec<&str>> = text
        .lines()
        .map(|line| {
            cell_sep
                .split(line.trim())
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .collect::<Vec<_>>()
        })
        .filter(|cells| !cells.is_empty())
        .collect();

    for (i, row) in rows.iter().enumerate() {
        let Some(col) = row.iter().position(|c| c.to_lowercase().contains("descri")) else {
            continue;
        };
        return rows
            .get(i + 1)
            .and_then(|next| next.get(col))
            .map(|c| c.to_string());
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Representación gráfica de factura electrónica
CUFE: 3fa1c
Datos del Emisor / Vendedor
Razón Social: PROVEEDOR DEMO SAS
Tipo de contribuyente: Persona Jurídica
Régimen fiscal: Responsable de IVA O-13
Departamento: Antioquia
Régimen fiscal: No responsable R-99-PN
Datos del Adquiriente / Comprador
Departamento: Cundinamarca
Forma de pago: Crédito
Nro  Código  Descripción  Cantidad  Precio
1  P-01  Servicio de aseo mensual  1  1.000.000,00
Total Bruto Factura 1.000.000,00
Total Bruto Factura 9,99
";

    #[test]
    fn test_vendor_block() {
        let info = extract_vendor_info(SAMPLE);
        assert_eq!(info.contributor_type, Some(ContributorType::LegalPerson));
        assert_eq!(info.department.as_deref(), Some("Antioquia"));
        assert_eq!(info.tax_regime.as_deref(), Some("O-13"));
    }

    #[test]
    fn test_vendor_block_without_buyer_heading() {
        let text = "Datos del vendedor\nTipo de contribuyente: Persona natural y asimiladas\nRégimen: Simple\n";
        let info = extract_vendor_info(text);
        assert_eq!(info.contributor_type, Some(ContributorType::NaturalPerson));
        assert_eq!(info.tax_regime.as_deref(), Some("Simple"));
        assert_eq!(info.department, None);
    }

    #[test]
    fn test_vendor_block_missing() {
        assert_eq!(extract_vendor_info("Forma de pago: Contado"), VendorInfo::default());
    }

    #[test]
    fn test_scalar_fields() {
        assert_eq!(extract_payment_method(SAMPLE).as_deref(), Some("Crédito"));
        assert_eq!(extract_gross_total(SAMPLE).as_deref(), Some("1000000.00"));
    }

    #[test]
    fn test_missing_gross_total_is_none() {
        assert_eq!(extract_gross_total("Total a pagar 1.000"), None);
    }

    #[test]
    fn test_product_description_from_table() {
        assert_eq!(
            extract_product_description(SAMPLE).as_deref(),
            Some("Servicio de aseo mensual")
        );
        assert_eq!(extract_product_description("no tables here"), None);
    }

    #[test]
    fn test_referenced_invoice_skips_banner() {
        let text = "Factura Electrónica BANNER\nNota débito\nReferencia Factura Electrónica FV1234 del 01/02/2025\n";
        assert_eq!(extract_referenced_invoice(text).as_deref(), Some("FV1234"));
        assert_eq!(extract_referenced_invoice("a\nb\nc"), None);
    }

    #[test]
    fn test_referenced_invoice_ignores_leading_blank_lines() {
        let text = "\n\nFactura Electrónica de Venta\nNota Débito ND-5\nReferencia Factura Electrónica FV1234 del 01/02/2025\n";
        assert_eq!(extract_referenced_invoice(text).as_deref(), Some("FV1234"));
    }

    #[test]
    fn test_referenced_invoice_skips_banner_on_every_page() {
        let text = "Factura Electrónica de Venta\nNota Débito ND-5\nDetalle\n\x0c\nFactura Electrónica de Venta\nNota Débito ND-5\nReferencia Factura Electrónica FV77\n";
        assert_eq!(extract_referenced_invoice(text).as_deref(), Some("FV77"));
    }

    #[test]
    fn test_payment_method_on_next_line() {
        assert_eq!(
            extract_payment_method("Forma de pago:\nContado\nMedio de pago: Efectivo").as_deref(),
            Some("Contado")
        );
        assert_eq!(extract_payment_method("Forma de pago:   "), None);
    }
}
