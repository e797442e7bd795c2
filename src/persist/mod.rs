use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::aln::tree::Tree;
use crate::core::error::{AlnError, AlnResult};

const FORMAT: &str = "aln-tree";
const VERSION: u32 = 1;

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    format: &'a str,
    version: u32,
    tree: &'a Tree,
}

#[derive(Deserialize)]
struct Envelope {
    format: String,
    version: u32,
    tree: Tree,
}

pub fn to_json(tree: &Tree) -> AlnResult<String> {
    Ok(serde_json::to_string_pretty(&envelope(tree))?)
}

pub fn from_json(text: &str) -> AlnResult<Tree> {
    unwrap_envelope(serde_json::from_str(text)?)
}

/// Writes the tree structure and leaf parameters. Training statistics and
/// buffers are not saved.
pub fn save(tree: &Tree, path: impl AsRef<Path>) -> AlnResult<()> {
    let mut w = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut w, &envelope(tree))?;
    w.flush()?;
    Ok(())
}

pub fn load(path: impl AsRef<Path>) -> AlnResult<Tree> {
    let r = BufReader::new(File::open(path)?);
    unwrap_envelope(serde_json::from_reader(r)?)
}

fn envelope(tree: &Tree) -> EnvelopeRef<'_> {
    EnvelopeRef {
        format: FORMAT,
        version: VERSION,
        tree,
    }
}

fn unwrap_envelope(env: Envelope) -> AlnResult<Tree> {
    if env.format != FORMAT {
        return Err(AlnError::Generic(format!(
            "not an ALN model file (format '{}')",
            env.format
        )));
    }
    if env.version != VERSION {
        return Err(AlnError::Generic(format!(
            "unsupported model version {} (expected {VERSION})",
            env.version
        )));
    }
    let mut tree = env.tree;
    tree.validate_and_reset()?;
    Ok(tree)
}
