use crate::error::{BotError, Result};
use crate::sheet::*;
use time::macros::format_description;
use time::{Date, PrimitiveDateTime};
use tracing::warn;

/// Excel day 0 (1899-12-30) as a Julian day number.
const EXCEL_EPOCH_JULIAN_DAY: i32 = 2_415_019;

/// Canonical fields of one spreadsheet row.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    pub cufe: String,
    pub invoice_number: String,
    pub prefix: String,
    pub consecutive: String,
    pub issue_date: String,
    pub iva: String,
    pub product_code: String,
    pub counterparty_nit: String,
    pub vendor_name: String,
    pub receiver_name: String,
    pub document_type: String,
    pub cost_center: String,
    pub total: String,
}

/// Stringify a cell, dropping the ".0" of integral floats.
pub fn convert_to_string(cell: &Cell) -> String {
    match cell {
        Cell::Empty => String::new(),
        Cell::Text(s) => s.clone(),
        Cell::Number(n) if n.is_finite() && n.fract() == 0.0 => format!("{}", *n as i64),
        Cell::Number(n) => n.to_string(),
        Cell::Bool(b) => (if *b { "True" } else { "False" }).to_string(),
    }
}

/// Split a consecutive into its leading letters and the rest.
///
/// `prefix + rest` always reproduces the input.
pub fn split_consecutive(value: &str) -> (String, String) {
    let cut = value
        .char_indices()
        .find(|(_, c)| !c.is_ascii_alphabetic())
        .map(|(i, _)| i)
        .unwrap_or(value.len());
    (value[..cut].to_string(), value[cut..].to_string())
}

/// Prefix and consecutive after the blank-value defaults.
pub fn derive_prefix_consecutive(prefix: &Cell, consecutive: &Cell) -> (String, String) {
    if prefix.as_str().is_some_and(|p| p.trim().eq_ignore_ascii_case("nan")) {
        warn!("Prefix cell holds the literal text \"nan\"; treating it as blank");
    }
    match (prefix.is_blank(), consecutive.is_blank()) {
        (false, true) => (convert_to_string(prefix), String::new()),
        (false, false) => (convert_to_string(prefix), convert_to_string(consecutive)),
        (true, true) => ("FE".to_string(), String::new()),
        (true, false) => split_consecutive(convert_to_string(consecutive).trim()),
    }
}

pub fn counterparty_nit(group: &str, issuer_nit: &str, receiver_nit: &str) -> Result<String> {
    match group.trim() {
        "Emitido" => Ok(receiver_nit.to_string()),
        "Recibido" => Ok(issuer_nit.to_string()),
        other => Err(BotError::UnknownGroup(other.to_string())),
    }
}

pub fn normalize_row(sheet: &InvoiceSheet, row: usize) -> Result<NormalizedRow> {
    let text = |col: &str| convert_to_string(sheet.get(row, col));

    let cufe = text(COL_CUFE).trim().to_string();
    if cufe.is_empty() || sheet.get(row, COL_CUFE).is_blank() {
        return Err(BotError::Row("CUFE/CUDE is empty".into()));
    }

    let (prefix, consecutive) =
        derive_prefix_consecutive(sheet.get(row, COL_PREFIX), sheet.get(row, COL_FOLIO));
    let issuer_nit = text(COL_ISSUER_NIT);
    let receiver_nit = text(COL_RECEIVER_NIT);

    Ok(NormalizedRow {
        invoice_number: format!("{prefix}{consecutive}"),
        counterparty_nit: counterparty_nit(&text(COL_GROUP), &issuer_nit, &receiver_nit)?,
        issue_date: format_issue_date(sheet.get(row, COL_ISSUE_DATE))?,
        iva: text(COL_IVA),
        product_code: text(COL_PRODUCT_CODE),
        vendor_name: text(COL_ISSUER_NAME),
        receiver_name: text(COL_RECEIVER_NAME),
        document_type: text(COL_DOCUMENT_TYPE),
        cost_center: text(COL_COST_CENTER),
        total: text(COL_TOTAL),
        cufe,
        prefix,
        consecutive,
    })
}

/// Issue date as `dd/mm/yyyy`.
pub fn format_issue_date(cell: &Cell) -> Result<String> {
    let out = format_description!("[day]/[month]/[year]");
    parse_issue_date(cell)?
        .format(&out)
        .map_err(|e| BotError::Row(format!("cannot format date: {e}")))
}

/// Issue date from an Excel serial or one of the text layouts seen in exports.
pub fn parse_issue_date(cell: &Cell) -> Result<Date> {
    match cell {
        Cell::Number(serial) => Date::from_julian_day(EXCEL_EPOCH_JULIAN_DAY + serial.floor() as i32)
            .map_err(|e| BotError::Row(format!("invalid date serial {serial}: {e}"))),
        Cell::Text(s) => parse_date_text(s.trim())
            .ok_or_else(|| BotError::Row(format!("unrecognized date format: {s}"))),
        other => Err(BotError::Row(format!("invalid issue date: {other:?}"))),
    }
}

fn parse_date_text(s: &str) -> Option<Date> {
    let dashed = format_description!("[day]-[month]-[year]");
    let slashed = format_description!("[day]/[month]/[year]");
    let iso = format_description!("[year]-[month]-[day]");
    let iso_time = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");

    Date::parse(s, &dashed)
        .or_else(|_| Date::parse(s, &slashed))
        .or_else(|_| Date::parse(s, &iso))
        .ok()
        .or_else(|| PrimitiveDateTime::parse(s, &iso_time).ok().map(|dt| dt.date()))
        .or_else(|| {
            // "2025-03-15 00:00:00" as written by pandas
            let head = s.get(..10)?;
            Date::parse(head, &iso).ok()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::tests::input_sheet;
    use std::path::Path;

    #[test]
    fn test_convert_to_string() {
        assert_eq!(convert_to_string(&Cell::Number(42.0)), "42");
        assert_eq!(convert_to_string(&Cell::Number(3.14)), "3.14");
        assert_eq!(convert_to_string(&Cell::text("Hola")), "Hola");
        assert_eq!(convert_to_string(&Cell::Empty), "");
    }

    #[test]
    fn test_split_reproduces_consecutive() {
        for value in ["SETP990001234", "FV12", "12345", "ABC", "FE-77", ""] {
            let (prefix, rest) = split_consecutive(value);
            assert_eq!(format!("{prefix}{rest}"), value);
            assert!(prefix.chars().all(|c| c.is_ascii_alphabetic()));
        }
        assert_eq!(split_consecutive("SETP990001234"), ("SETP".into(), "990001234".into()));
    }

    #[test]
    fn test_prefix_defaults() {
        let blank = Cell::Empty;
        assert_eq!(derive_prefix_consecutive(&blank, &blank), ("FE".into(), "".into()));
        assert_eq!(
            derive_prefix_consecutive(&Cell::text("nan"), &Cell::text("FV88")),
            ("FV".into(), "88".into())
        );
        assert_eq!(
            derive_prefix_consecutive(&Cell::text("SETT"), &Cell::Number(15.0)),
            ("SETT".into(), "15".into())
        );
        assert_eq!(
            derive_prefix_consecutive(&Cell::Number(f64::NAN), &Cell::Number(501.0)),
            ("".into(), "501".into())
        );
    }

    #[test]
    fn test_counterparty_by_group() {
        assert_eq!(counterparty_nit("Emitido", "1", "2").unwrap(), "2");
        assert_eq!(counterparty_nit("Recibido", "1", "2").unwrap(), "1");
        assert!(matches!(
            counterparty_nit("Otro", "1", "2"),
            Err(BotError::UnknownGroup(g)) if g == "Otro"
        ));
    }

    #[test]
    fn test_normalize_row() {
        let sheet = input_sheet(Path::new("x.xlsx"), 1);
        let row = normalize_row(&sheet, 0).unwrap();
        assert_eq!(row.invoice_number, "FV100");
        assert_eq!(row.counterparty_nit, "800100200");
        assert_eq!(row.issue_date, "15/03/2025");
        assert_eq!(row.iva, "19");
        assert_eq!(row.total, "119");
    }

    #[test]
    fn test_normalize_rejects_unknown_group() {
        let mut sheet = input_sheet(Path::new("x.xlsx"), 1);
        sheet.set_text(0, COL_GROUP, "Validado");
        assert!(matches!(normalize_row(&sheet, 0), Err(BotError::UnknownGroup(_))));
    }

    #[test]
    fn test_issue_date_formats() {
        assert_eq!(format_issue_date(&Cell::text("01/02/2025")).unwrap(), "01/02/2025");
        assert_eq!(format_issue_date(&Cell::text("2025-02-01 00:00:00")).unwrap(), "01/02/2025");
        // 45689 is 2025-02-01 in the 1900 date system
        assert_eq!(format_issue_date(&Cell::Number(45689.0)).unwrap(), "01/02/2025");
        assert!(format_issue_date(&Cell::text("mañana")).is_err());
    }
}
