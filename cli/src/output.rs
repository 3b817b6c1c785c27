//! Text and JSON rendering. Command handlers build a payload and hand it to
//! [`OutputWriter`]; format switching stays here.

use std::io::Write;

use serde::Serialize;

use crate::cli::OutputFormat;

pub struct OutputWriter {
    format: OutputFormat,
}

impl OutputWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn render<T: Render + Serialize>(&self, payload: &T) -> anyhow::Result<()> {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        self.render_to(payload, &mut handle)
    }

    pub fn render_to<T: Render + Serialize>(
        &self,
        payload: &T,
        w: &mut dyn Write,
    ) -> anyhow::Result<()> {
        match self.format {
            OutputFormat::Text => payload.render_text(w)?,
            OutputFormat::Json => {
                serde_json::to_writer_pretty(&mut *w, payload)?;
                writeln!(w)?;
            }
        }
        Ok(())
    }
}

/// Human-readable rendering, implemented next to each payload.
pub trait Render {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    impl Render for Sample {
        fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
            writeln!(w, "{}: {}", self.name, self.count)
        }
    }

    fn sample() -> Sample {
        Sample {
            name: "nodes".into(),
            count: 3,
        }
    }

    #[test]
    fn test_text_rendering() {
        let mut buf = Vec::new();
        OutputWriter::new(OutputFormat::Text)
            .render_to(&sample(), &mut buf)
            .unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "nodes: 3\n");
    }

    #[test]
    fn test_json_rendering() {
        let mut buf = Vec::new();
        OutputWriter::new(OutputFormat::Json)
            .render_to(&sample(), &mut buf)
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(value["name"], "nodes");
        assert_eq!(value["count"], 3);
    }
}
