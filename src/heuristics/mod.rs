// src/heuristics/mod.rs

mod dian;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub use dian::{
    extract_gross_total, extract_payment_method, extract_product_description,
    extract_referenced_invoice, extract_vendor_info,
};

/// Vendor contributor type as printed in the issuer block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ContributorType {
    NaturalPerson,
    LegalPerson,
    Other(String),
}

impl ContributorType {
    /// Accent-insensitive classification of a raw label.
    pub fn classify(raw: &str) -> Self {
        let folded = fold_accents(raw).to_lowercase();
        if folded.contains("natural") {
            ContributorType::NaturalPerson
        } else if folded.contains("juridica") {
            ContributorType::LegalPerson
        } else {
            ContributorType::Other(raw.to_string())
        }
    }
}

impl fmt::Display for ContributorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContributorType::NaturalPerson => f.write_str("Persona Natural"),
            ContributorType::LegalPerson => f.write_str("Persona Jurídica"),
            ContributorType::Other(raw) => f.write_str(raw),
        }
    }
}

impl From<String> for ContributorType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Persona Natural" => ContributorType::NaturalPerson,
            "Persona Jurídica" => ContributorType::LegalPerson,
            _ => ContributorType::Other(s),
        }
    }
}

impl From<ContributorType> for String {
    fn from(c: ContributorType) -> Self {
        c.to_string()
    }
}

/// Labeled fields from the "Datos del Emisor / Vendedor" block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VendorInfo {
    #[serde(rename = "Tipo de contribuyente")]
    pub contributor_type: Option<ContributorType>,
    #[serde(rename = "Departamento")]
    pub department: Option<String>,
    #[serde(rename = "Régimen fiscal")]
    pub tax_regime: Option<String>,
}

/// Everything read from one invoice PDF.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedPdfRecord {
    #[serde(rename = "Archivo")]
    pub source: PathBuf,
    #[serde(rename = "Información del vendedor")]
    pub vendor: VendorInfo,
    #[serde(rename = "Forma de Pago")]
    pub payment_method: Option<String>,
    #[serde(rename = "Descripción del producto")]
    pub product_description: Option<String>,
    /// Decimal string with `.` as separator, e.g. "1250000.50".
    #[serde(rename = "Total Bruto Factura")]
    pub gross_total: Option<String>,
    /// Invoice referenced by a debit note, when present.
    #[serde(rename = "Factura Referenciada", default, skip_serializing_if = "Option::is_none")]
    pub referenced_invoice: Option<String>,
}

impl ExtractedPdfRecord {
    pub fn gross_total_value(&self) -> Option<f64> {
        self.gross_total.as_deref().and_then(|v| v.parse().ok())
    }

    /// How many fields were successfully extracted.
    pub fn coverage(&self) -> (usize, usize) {
        let total = 6;
        let filled = [
            self.vendor.contributor_type.is_some(),
            self.vendor.department.is_some(),
            self.vendor.tax_regime.is_some(),
            self.payment_method.is_some(),
            self.product_description.is_some(),
            self.gross_total.is_some(),
        ]
        .iter()
        .filter(|&&v| v)
        .count();
        (filled, total)
    }
}

/// Parse every field out of extracted PDF text.
pub fn extract_fields(source: PathBuf, text: &str) -> ExtractedPdfRecord {
    ExtractedPdfRecord {
        source,
        vendor: extract_vendor_info(text),
        payment_method: extract_payment_method(text),
        product_description: extract_product_description(text),
        gross_total: extract_gross_total(text),
        referenced_invoice: extract_referenced_invoice(text),
    }
}

/// Strip Spanish diacritics so matching can ignore accents.
pub fn fold_accents(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'á' | 'à' | 'ä' => 'a',
            'é' | 'è' | 'ë' => 'e',
            'í' | 'ì' | 'ï' => 'i',
            'ó' | 'ò' | 'ö' => 'o',
            'ú' | 'ù' | 'ü' => 'u',
            'Á' | 'À' | 'Ä' => 'A',
            'É' | 'È' | 'Ë' => 'E',
            'Í' | 'Ì' | 'Ï' => 'I',
            'Ó' | 'Ò' | 'Ö' => 'O',
            'Ú' | 'Ù' | 'Ü' => 'U',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contributor_classification() {
        assert_eq!(ContributorType::classify("Persona Natural"), ContributorType::NaturalPerson);
        assert_eq!(ContributorType::classify("PERSONA JURÍDICA"), ContributorType::LegalPerson);
        assert_eq!(ContributorType::classify("persona juridica"), ContributorType::LegalPerson);
        assert_eq!(
            ContributorType::classify("Sucursal"),
            ContributorType::Other("Sucursal".into())
        );
    }

    #[test]
    fn test_record_json_uses_helper_keys() {
        let record = ExtractedPdfRecord {
            source: PathBuf::from("a.pdf"),
            vendor: VendorInfo {
                contributor_type: Some(ContributorType::LegalPerson),
                ..Default::default()
            },
            gross_total: Some("1000.5".into()),
            ..Default::default()
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["Información del vendedor"]["Tipo de contribuyente"], "Persona Jurídica");
        assert_eq!(json["Total Bruto Factura"], "1000.5");
        assert!(json.get("Factura Referenciada").is_none());

        let back: ExtractedPdfRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
        assert_eq!(back.gross_total_value(), Some(1000.5));
    }
}
