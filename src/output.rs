//! Record-oriented output to the terminal or a file, as a rendered table,
//! JSON lines or CSV.

use std::path::PathBuf;

use csv_core::WriteResult;

#[derive(clap::ValueEnum, Clone, Debug)]
pub enum Format {
    Table,
    Jsonl,
    Csv,
}

#[derive(clap::Parser)]
#[group(id = "output::Args")]
pub struct Args {
    /// File to write the records to instead of the terminal.
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
    #[arg(long, short = 'f', value_enum, default_value_t = Format::Table)]
    format: Format,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not open the specified output file at {1:?}")]
    OpenOutputFile(#[source] std::io::Error, PathBuf),
    #[error("could not write records to the output file at {1:?}")]
    WriteFile(#[source] std::io::Error, PathBuf),
    #[error("could not write records to the terminal")]
    WriteStdout(#[source] std::io::Error),
    #[error("could not serialize a record to JSON")]
    SerializeJson(#[source] serde_json::Error),
}

impl Args {
    pub fn to_output(self) -> Result<Output, Error> {
        let io = match &self.output {
            None => Box::new(std::io::stdout().lock()) as Box<_>,
            Some(path) => Box::new(
                std::fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)
                    .map_err(|e| Error::OpenOutputFile(e, path.clone()))?,
            ) as Box<_>,
        };
        let formatter = match &self.format {
            Format::Table => {
                let mut table = comfy_table::Table::new();
                table.set_content_arrangement(comfy_table::ContentArrangement::Dynamic);
                Formatter::Table { table }
            }
            Format::Jsonl => Formatter::Jsonl,
            Format::Csv => Formatter::Csv { written_records: false },
        };
        Ok(Output { args: self, io, formatter })
    }
}

pub struct Output {
    args: Args,
    io: Box<dyn std::io::Write>,
    formatter: Formatter,
}

enum Formatter {
    Csv { written_records: bool },
    Table { table: comfy_table::Table },
    Jsonl,
}

impl Output {
    /// Names the record columns. CSV output requires this before any record.
    pub fn headers(&mut self, headers: Vec<&'static str>) -> Result<(), Error> {
        match &mut self.formatter {
            Formatter::Csv { written_records } => {
                assert!(!*written_records, "headers must be written before any record");
                *written_records = true;
                self.write_csv_row(&headers)?;
            }
            Formatter::Table { table } => {
                table.set_header(headers);
            }
            Formatter::Jsonl => {}
        }
        Ok(())
    }

    /// Appends one record. The closures keep the row rendering lazy, so the
    /// formats that don't need a given representation never compute it.
    pub fn record<R: serde::Serialize>(
        &mut self,
        row: impl FnOnce() -> Vec<String>,
        serde_record: impl FnOnce() -> R,
    ) -> Result<(), Error> {
        match &mut self.formatter {
            Formatter::Csv { written_records } => {
                *written_records = true;
                let values = row();
                self.write_csv_row(&values)?;
            }
            Formatter::Table { table } => {
                table.add_row(row());
            }
            Formatter::Jsonl => {
                serde_json::to_writer(&mut self.io, &serde_record())
                    .map_err(Error::SerializeJson)?;
                writeln!(self.io).map_err(|e| self.write_error(e))?;
            }
        }
        Ok(())
    }

    fn write_csv_row<V: std::ops::Deref<Target = str>>(
        &mut self,
        values: &[V],
    ) -> Result<(), Error> {
        let max_len = 2 + 2 * values.iter().map(|v| v.len()).max().unwrap_or(0);
        let mut output = vec![0; max_len];
        let mut writer = csv_core::Writer::new();
        for value in values {
            let input = value.as_bytes();
            let (WriteResult::InputEmpty, read, written) = writer.field(input, &mut output) else {
                panic!("the output buffer is always large enough for one field");
            };
            assert_eq!(value.len(), read);
            self.io.write_all(&output[..written]).map_err(|e| self.write_error(e))?;
            let (WriteResult::InputEmpty, written) = writer.delimiter(&mut output) else {
                panic!("the output buffer is always large enough for a delimiter");
            };
            self.io.write_all(&output[..written]).map_err(|e| self.write_error(e))?;
        }
        let (WriteResult::InputEmpty, written) = writer.terminator(&mut output) else {
            panic!("the output buffer is always large enough for a terminator");
        };
        self.io.write_all(&output[..written]).map_err(|e| self.write_error(e))
    }

    fn write_error(&self, e: std::io::Error) -> Error {
        match &self.args.output {
            None => Error::WriteStdout(e),
            Some(p) => Error::WriteFile(e, p.into()),
        }
    }

    /// Renders any buffered output and flushes the destination.
    pub fn finish(mut self) -> Result<(), Error> {
        if let Formatter::Table { table } = &self.formatter {
            self.io
                .write_fmt(format_args!("{table}\n"))
                .map_err(|e| self.write_error(e))?;
        }
        self.io.flush().map_err(|e| self.write_error(e))
    }
}
