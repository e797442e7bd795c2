use std::fmt::{Display, Formatter, Result as FmtResult};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use clap::ValueEnum;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::training::notification::EpochInfo;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CurveFormat {
    #[default]
    Csv,
    Tsv,
    Json,
}

impl CurveFormat {
    /// Guess from a file extension; unknown extensions give CSV.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(e) if e.eq_ignore_ascii_case("tsv") => CurveFormat::Tsv,
            Some(e) if e.eq_ignore_ascii_case("json") => CurveFormat::Json,
            _ => CurveFormat::Csv,
        }
    }
}

const COLUMNS: [&str; 7] = [
    "epoch",
    "rms_error",
    "leaf_count",
    "active_leaves",
    "splits",
    "needing_split",
    "cpu_seconds",
];

/// Per-epoch records of one or more training calls.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LearningCurve {
    epochs: Vec<EpochInfo>,
}

impl LearningCurve {
    pub fn push(&mut self, e: EpochInfo) {
        self.epochs.push(e);
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn last(&self) -> Option<&EpochInfo> {
        self.epochs.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EpochInfo> {
        self.epochs.iter()
    }

    pub fn extend(&mut self, other: LearningCurve) {
        self.epochs.extend(other.epochs);
    }

    pub fn export(&self, path: &Path, format: CurveFormat) -> io::Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        self.write_to(&mut w, format)?;
        w.flush()
    }

    pub fn write_to<W: Write>(&self, w: &mut W, format: CurveFormat) -> io::Result<()> {
        match format {
            CurveFormat::Csv => self.write_delimited(w, ','),
            CurveFormat::Tsv => self.write_delimited(w, '\t'),
            CurveFormat::Json => {
                serde_json::to_writer_pretty(&mut *w, self).map_err(io::Error::other)?;
                writeln!(w)
            }
        }
    }

    fn write_delimited<W: Write>(&self, w: &mut W, sep: char) -> io::Result<()> {
        writeln!(w, "{}", COLUMNS.join(&sep.to_string()))?;
        for e in &self.epochs {
            let needing = e.needing_split.map(|n| n.to_string()).unwrap_or_default();
            writeln!(
                w,
                "{}{sep}{}{sep}{}{sep}{}{sep}{}{sep}{}{sep}{:.6}",
                e.epoch,
                fmtv(e.rms_error),
                e.leaf_count,
                e.active_leaves,
                e.splits,
                needing,
                e.cpu_seconds,
            )?;
        }
        Ok(())
    }
}

impl Display for EpochInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(
            f,
            "epoch={}, rms={}, leaves={}, active={}, splits={}",
            self.epoch,
            fmtv(self.rms_error),
            self.leaf_count,
            self.active_leaves,
            self.splits
        )?;
        if let Some(n) = self.needing_split {
            write!(f, ", needing_split={n}")?;
        }
        write!(f, ", t={:.6}s", self.cpu_seconds)
    }
}

#[inline]
fn fmtv(v: f64) -> String {
    if v.is_nan() {
        "NaN".into()
    } else {
        format!("{:.6e}", v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn epoch(epoch: usize, rms: f64, needing: Option<usize>) -> EpochInfo {
        EpochInfo {
            epoch,
            rms_error: rms,
            leaf_count: 1 + epoch,
            active_leaves: 1,
            splits: epoch,
            needing_split: needing,
            cpu_seconds: 0.5,
        }
    }

    fn curve() -> LearningCurve {
        let mut c = LearningCurve::default();
        c.push(epoch(0, 0.25, None));
        c.push(epoch(1, f64::NAN, Some(3)));
        c
    }

    #[test]
    fn csv_has_header_and_one_row_per_epoch() {
        let mut out = Vec::new();
        curve().write_to(&mut out, CurveFormat::Csv).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], COLUMNS.join(","));
        assert!(lines[1].starts_with("0,2.500000e-1,1,1,0,,"));
        assert!(lines[2].contains("NaN"));
        assert!(lines[2].contains(",3,"));
    }

    #[test]
    fn tsv_uses_tabs() {
        let mut out = Vec::new();
        curve().write_to(&mut out, CurveFormat::Tsv).unwrap();
        let text = String::from_utf8(out).unwrap();
        let first = text.lines().next().unwrap();
        assert_eq!(first.split('\t').count(), COLUMNS.len());
    }

    #[test]
    fn json_export_reads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("curve.json");
        let mut c = LearningCurve::default();
        c.push(epoch(0, 0.125, Some(0)));
        c.export(&path, CurveFormat::from_path(&path)).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let back: LearningCurve = serde_json::from_str(&text).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(CurveFormat::from_path(Path::new("a.TSV")), CurveFormat::Tsv);
        assert_eq!(CurveFormat::from_path(Path::new("a.json")), CurveFormat::Json);
        assert_eq!(CurveFormat::from_path(Path::new("a")), CurveFormat::Csv);
    }

    #[test]
    fn display_mentions_split_check_only_when_run() {
        assert!(!epoch(0, 1.0, None).to_string().contains("needing_split"));
        assert!(epoch(0, 1.0, Some(2)).to_string().contains("needing_split=2"));
    }
}
