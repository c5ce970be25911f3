//! Lectura perezosa del archivo subido.
//!
//! Un hilo de bloqueo recorre el CSV registro a registro y manda cada fila por
//! un canal acotado; el procesador las consume con `next().await`. Así en
//! memoria sólo vive la fila que va en tránsito, sin importar el tamaño del
//! archivo.

use common::{Cell, RawRow};
use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};

/// Filas en tránsito entre el lector y el procesador.
const ROW_CHANNEL_CAPACITY: usize = 1;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("no se pudo abrir el archivo {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("archivo dañado cerca de la fila {row}: {source}")]
    Corrupt {
        row: u64,
        #[source]
        source: csv::Error,
    },
    #[error("el lector de filas terminó inesperadamente: {0}")]
    Reader(String),
}

type RowItem = Result<RawRow, SourceError>;

pub struct RowStream {
    rx: mpsc::Receiver<RowItem>,
    reader: Option<JoinHandle<()>>,
}

impl RowStream {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (tx, rx) = mpsc::channel(ROW_CHANNEL_CAPACITY);
        let reader = tokio::task::spawn_blocking(move || read_rows(&path, tx));
        Self {
            rx,
            reader: Some(reader),
        }
    }

    /// Siguiente fila del archivo, `None` al terminar.
    pub async fn next(&mut self) -> Option<RowItem> {
        if let Some(item) = self.rx.recv().await {
            return Some(item);
        }

        // Canal cerrado: el lector terminó. Si fue por panic lo reportamos.
        if let Some(handle) = self.reader.take() {
            if let Err(e) = handle.await {
                return Some(Err(SourceError::Reader(e.to_string())));
            }
        }
        None
    }
}

fn read_rows(path: &Path, tx: mpsc::Sender<RowItem>) {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(source) => {
            let _ = tx.blocking_send(Err(SourceError::Open {
                path: path.display().to_string(),
                source,
            }));
            return;
        }
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(BufReader::new(file));
    let mut record = csv::StringRecord::new();
    let mut rows = RowCounter::default();

    loop {
        match reader.read_record(&mut record) {
            Ok(true) => {
                let line = record.position().map(|p| p.line()).unwrap_or(0);
                let number = rows.next(line, &record);
                let cells = record.iter().map(Cell::from_raw).collect();
                if tx.blocking_send(Ok(RawRow::new(number, cells))).is_err() {
                    // el procesador dejó de leer
                    return;
                }
            }
            Ok(false) => return,
            Err(source) => {
                let row = rows.after_last(source.position().map(|p| p.line()).unwrap_or(0));
                let _ = tx.blocking_send(Err(SourceError::Corrupt { row, source }));
                return;
            }
        }
    }
}

/// Traduce líneas físicas del CSV a filas de la hoja (encabezado = 1).
///
/// Una celda entre comillas con saltos de línea ocupa varias líneas pero es
/// una sola fila; las líneas vacías que el lector salta sí cuentan como filas.
#[derive(Default)]
struct RowCounter {
    // (fila, última línea física) del registro anterior
    last: Option<(u64, u64)>,
}

impl RowCounter {
    fn next(&mut self, line: u64, record: &csv::StringRecord) -> u64 {
        let number = self.after_last(line);
        let embedded = record.iter().map(|f| f.matches('\n').count() as u64).sum::<u64>();
        self.last = Some((number, line + embedded));
        number
    }

    /// Fila que corresponde a un registro que empieza en `line`.
    fn after_last(&self, line: u64) -> u64 {
        match self.last {
            None => line,
            Some((row, end)) => row + line.saturating_sub(end).max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs, path::PathBuf};

    fn temp_file(name: &str, content: &[u8]) -> PathBuf {
        let dir = env::temp_dir().join("row_source_tests");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    async fn collect(path: PathBuf) -> Vec<RowItem> {
        let mut stream = RowStream::open(path);
        let mut out = Vec::new();
        while let Some(item) = stream.next().await {
            out.push(item);
        }
        out
    }

    #[tokio::test]
    async fn numera_filas_como_la_hoja() {
        let path = temp_file(
            "numeracion.csv",
            b"id,name,status,in,out\n1,Ana,PENDING,2024-01-01,2024-01-02\n,,,,\n2,Bob,CONFIRMED,2024-01-03,2024-01-04\n",
        );

        let rows: Vec<RawRow> = collect(path)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(rows.iter().map(|r| r.number).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        assert!(rows[0].is_header());
        assert!(rows[2].is_blank());
        assert_eq!(rows[1].cells[1], Cell::Text("Ana".to_string()));
    }

    #[tokio::test]
    async fn lineas_vacias_no_corren_la_numeracion() {
        let path = temp_file("vacias.csv", b"h\n\n7,Ana\n");
        let rows: Vec<RawRow> = collect(path)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].number, 3);
    }

    #[tokio::test]
    async fn celda_con_salto_de_linea_es_una_sola_fila() {
        let path = temp_file(
            "multilinea.csv",
            b"h\n1,\"Ana\nMaria\"\n\n3,Bob\n4,Eva\n",
        );
        let rows: Vec<RawRow> = collect(path)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(rows.iter().map(|r| r.number).collect::<Vec<_>>(), vec![1, 2, 4, 5]);
        assert_eq!(rows[1].cells[1], Cell::Text("Ana\nMaria".to_string()));
    }

    #[tokio::test]
    async fn archivo_inexistente_es_error_de_apertura() {
        let path = env::temp_dir().join("row_source_tests").join("no_existe.csv");
        let _ = fs::remove_file(&path);

        let items = collect(path).await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(SourceError::Open { .. })));
    }

    #[tokio::test]
    async fn utf8_invalido_corta_el_stream() {
        let path = temp_file("corrupto.csv", b"h\n1,Ana\n2,\xff\xfe\n3,Bob\n");
        let items = collect(path).await;

        assert!(items[0].is_ok());
        assert!(items[1].is_ok());
        assert!(matches!(items.last(), Some(Err(SourceError::Corrupt { .. }))));
        assert_eq!(items.len(), 3);
    }
}
