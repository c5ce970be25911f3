//! Conversión de una fila cruda de la hoja de cálculo a un registro candidato.
//!
//! El parser nunca falla: lo que no se puede convertir queda como
//! `Field::Missing` o `Field::Invalid` y es el validador quien lo reporta.

use chrono::{DateTime, NaiveDate};

use crate::reservation::ReservationId;

/// Fila del encabezado (siempre se salta).
pub const HEADER_ROW: u64 = 1;

/// Posición (1-indexada) de cada columna en la hoja.
pub const COL_RESERVATION_ID: usize = 1;
pub const COL_GUEST_NAME: usize = 2;
pub const COL_STATUS: usize = 3;
pub const COL_CHECK_IN: usize = 4;
pub const COL_CHECK_OUT: usize = 5;

/// Mayor entero que un `f64` representa sin pérdida (2^53).
const MAX_EXACT_FLOAT_INT: f64 = 9_007_199_254_740_992.0;

/// Formatos de fecha aceptados cuando la celda llega como texto.
const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%d.%m.%Y", "%d/%m/%Y"];

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Integer(u64),
    Number(f64),
    Date(NaiveDate),
}

impl Cell {
    /// Tipa una celda que llega como texto plano (CSV).
    pub fn from_raw(raw: &str) -> Cell {
        // Limpia BOM por si viene de Excel/Windows
        let s = raw.trim_start_matches('\u{feff}').trim();
        if s.is_empty() {
            return Cell::Empty;
        }
        if let Ok(n) = s.parse::<u64>() {
            return Cell::Integer(n);
        }
        if let Ok(n) = s.parse::<f64>() {
            if n.is_finite() {
                return Cell::Number(n);
            }
        }
        if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return Cell::Date(d);
        }
        Cell::Text(s.to_string())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    fn as_text(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Text(s) => Some(s.trim().to_string()),
            Cell::Integer(n) => Some(n.to_string()),
            Cell::Number(n) => Some(n.to_string()),
            Cell::Date(d) => Some(d.to_string()),
        }
    }
}

/// Fila tal como sale del archivo, con su número de fila en la hoja.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub number: u64,
    pub cells: Vec<Cell>,
}

impl RawRow {
    pub fn new(number: u64, cells: Vec<Cell>) -> Self {
        Self { number, cells }
    }

    pub fn is_header(&self) -> bool {
        self.number == HEADER_ROW
    }

    /// Una fila sin ninguna celda con contenido se ignora, no es un error.
    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(Cell::is_empty)
    }

    /// Celda por columna 1-indexada; las que faltan al final cuentan como vacías.
    pub fn cell(&self, column: usize) -> &Cell {
        column
            .checked_sub(1)
            .and_then(|idx| self.cells.get(idx))
            .unwrap_or(&Cell::Empty)
    }
}

/// Resultado de convertir una celda a un tipo concreto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field<T> {
    Missing,
    Invalid(String),
    Value(T),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateRecord {
    pub reservation_id: Field<ReservationId>,
    pub guest_name: Field<String>,
    pub status: Field<String>,
    pub check_in_date: Field<NaiveDate>,
    pub check_out_date: Field<NaiveDate>,
}

pub fn parse_row(row: &RawRow) -> CandidateRecord {
    CandidateRecord {
        reservation_id: parse_reservation_id(row.cell(COL_RESERVATION_ID)),
        guest_name: parse_text(row.cell(COL_GUEST_NAME)),
        status: parse_text(row.cell(COL_STATUS)),
        check_in_date: parse_date(row.cell(COL_CHECK_IN)),
        check_out_date: parse_date(row.cell(COL_CHECK_OUT)),
    }
}

fn parse_reservation_id(cell: &Cell) -> Field<ReservationId> {
    match cell {
        Cell::Empty => Field::Missing,
        Cell::Integer(n) if *n >= 1 => Field::Value(*n),
        // "12.0" vale; por encima de 2^53 el float ya no es el id escrito
        Cell::Number(n) if *n >= 1.0 && n.fract() == 0.0 && *n < MAX_EXACT_FLOAT_INT => {
            Field::Value(*n as ReservationId)
        }
        other => match other.as_text() {
            Some(text) if !text.is_empty() => Field::Invalid(text),
            _ => Field::Missing,
        },
    }
}

fn parse_text(cell: &Cell) -> Field<String> {
    match cell.as_text() {
        Some(text) if !text.is_empty() => Field::Value(text),
        _ => Field::Missing,
    }
}

fn parse_date(cell: &Cell) -> Field<NaiveDate> {
    match cell {
        Cell::Empty => Field::Missing,
        Cell::Date(d) => Field::Value(*d),
        Cell::Text(s) if s.trim().is_empty() => Field::Missing,
        Cell::Text(s) => match parse_date_text(s) {
            Some(d) => Field::Value(d),
            None => Field::Invalid(s.trim().to_string()),
        },
        Cell::Integer(n) => Field::Invalid(n.to_string()),
        Cell::Number(n) => Field::Invalid(n.to_string()),
    }
}

/// Interpreta una fecha escrita como texto. Devuelve `None` si no es una
/// fecha de calendario válida en ninguno de los formatos aceptados.
pub fn parse_date_text(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| dt.date_naive())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(number: u64, raw: &[&str]) -> RawRow {
        RawRow::new(number, raw.iter().map(|c| Cell::from_raw(c)).collect())
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn from_raw_tipa_las_celdas() {
        assert_eq!(Cell::from_raw("   "), Cell::Empty);
        assert_eq!(Cell::from_raw("42"), Cell::Integer(42));
        assert_eq!(Cell::from_raw("4.5"), Cell::Number(4.5));
        assert_eq!(Cell::from_raw("2024-05-01"), Cell::Date(date(2024, 5, 1)));
        assert_eq!(Cell::from_raw(" Ana "), Cell::Text("Ana".to_string()));
        assert_eq!(Cell::from_raw("\u{feff}7"), Cell::Integer(7));
        assert_eq!(Cell::from_raw("NaN"), Cell::Text("NaN".to_string()));
    }

    #[test]
    fn parse_row_fila_completa() {
        let r = row(2, &["12345", "Jan Nowak", "CONFIRMED", "2024-05-01", "07.05.2024"]);
        let c = parse_row(&r);

        assert_eq!(c.reservation_id, Field::Value(12345));
        assert_eq!(c.guest_name, Field::Value("Jan Nowak".to_string()));
        assert_eq!(c.status, Field::Value("CONFIRMED".to_string()));
        assert_eq!(c.check_in_date, Field::Value(date(2024, 5, 1)));
        assert_eq!(c.check_out_date, Field::Value(date(2024, 5, 7)));
    }

    #[test]
    fn conversiones_invalidas_no_fallan() {
        let r = row(3, &["abc", "", "??", "mañana", "12"]);
        let c = parse_row(&r);

        assert_eq!(c.reservation_id, Field::Invalid("abc".to_string()));
        assert_eq!(c.guest_name, Field::Missing);
        assert_eq!(c.status, Field::Value("??".to_string()));
        assert_eq!(c.check_in_date, Field::Invalid("mañana".to_string()));
        assert_eq!(c.check_out_date, Field::Invalid("12".to_string()));
    }

    #[test]
    fn id_decimal_o_negativo_es_invalido() {
        assert_eq!(
            parse_row(&row(2, &["1.5"])).reservation_id,
            Field::Invalid("1.5".to_string())
        );
        assert_eq!(
            parse_row(&row(2, &["-3"])).reservation_id,
            Field::Invalid("-3".to_string())
        );
        assert_eq!(parse_row(&row(2, &["12.0"])).reservation_id, Field::Value(12));
    }

    #[test]
    fn id_grande_no_pierde_precision() {
        assert_eq!(
            parse_row(&row(2, &["9007199254740993"])).reservation_id,
            Field::Value(9_007_199_254_740_993)
        );
        assert_eq!(
            parse_row(&row(2, &["18446744073709551615"])).reservation_id,
            Field::Value(u64::MAX)
        );
        assert!(matches!(
            parse_row(&row(2, &["9007199254740993.0"])).reservation_id,
            Field::Invalid(_)
        ));
        assert_eq!(
            parse_row(&row(2, &["0"])).reservation_id,
            Field::Invalid("0".to_string())
        );
    }

    #[test]
    fn columnas_faltantes_cuentan_como_vacias() {
        let c = parse_row(&row(5, &["9", "Ana"]));
        assert_eq!(c.status, Field::Missing);
        assert_eq!(c.check_in_date, Field::Missing);
        assert_eq!(c.check_out_date, Field::Missing);
    }

    #[test]
    fn fila_en_blanco() {
        assert!(row(4, &["", "  ", ""]).is_blank());
        assert!(RawRow::new(4, vec![]).is_blank());
        assert!(!row(4, &["", "x"]).is_blank());
    }

    #[test]
    fn encabezado_es_fila_uno() {
        assert!(row(1, &["reservation_id"]).is_header());
        assert!(!row(2, &["1"]).is_header());
    }

    #[test]
    fn fechas_en_texto() {
        assert_eq!(parse_date_text("2024/02/29"), Some(date(2024, 2, 29)));
        assert_eq!(parse_date_text("31/12/2023"), Some(date(2023, 12, 31)));
        assert_eq!(
            parse_date_text("2024-05-01T10:00:00+02:00"),
            Some(date(2024, 5, 1))
        );
        assert_eq!(parse_date_text("2023-02-30"), None);
        assert_eq!(parse_date_text("ayer"), None);
    }
}
