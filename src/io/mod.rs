use std::error::Error;
use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::bail;
use bio::io::fasta::{Reader, Record};
use log::info;

use crate::tree::{tree_parser, Tree};
use crate::Result;

pub static NUCLEOTIDES: &[u8] = b"TCAGU";
pub static AMB_NUCLEOTIDES: &[u8] = b"RYSWKMBDHVN";
pub static GAP: u8 = b'-';
pub static POSSIBLE_GAPS: &[u8] = b"-.";

pub struct DataError {
    pub(crate) message: String,
}
impl fmt::Debug for DataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}
impl fmt::Display for DataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}
impl Error for DataError {}

fn is_nucleotide_word(seq: &[u8]) -> bool {
    seq.iter()
        .all(|c| NUCLEOTIDES.contains(c) || AMB_NUCLEOTIDES.contains(c) || *c == GAP)
}

/// Reads nucleotide sequences from a fasta file, returning a vector of fasta records.
/// All sequences are converted to uppercase and `.` gaps become `-`.
///
/// # Arguments
/// * `path` - Path to the fasta file.
///
/// # Example
/// ```
/// use phylo_evol::io::read_sequences;
/// use std::path::PathBuf;
/// let records = read_sequences(&PathBuf::from("./data/apes.fasta")).unwrap();
/// # assert_eq!(records.len(), 5);
/// # for rec in records {
/// #    assert_eq!(rec.seq().len(), 27);
/// # }
/// ```
pub fn read_sequences(path: &Path) -> Result<Vec<Record>> {
    info!("Reading sequences from file {}", path.display());
    let reader = Reader::from_file(path)?;
    let mut sequences = Vec::new();

    for result in reader.records() {
        let rec = result?;
        if let Err(e) = rec.check() {
            bail!(DataError {
                message: e.to_string()
            });
        }
        let seq: Vec<u8> = rec
            .seq()
            .to_ascii_uppercase()
            .iter()
            .map(|c| if POSSIBLE_GAPS.contains(c) { GAP } else { *c })
            .collect();

        if !is_nucleotide_word(&seq) {
            bail!(DataError {
                message: format!(
                    "Invalid nucleotide sequence encountered for {}: {}",
                    rec.id(),
                    String::from_utf8_lossy(&seq)
                )
            });
        }

        sequences.push(Record::with_attrs(rec.id(), rec.desc(), &seq));
    }
    if sequences.is_empty() {
        bail!(DataError {
            message: String::from("No sequences found in file")
        });
    }

    info!("Read sequences successfully");
    Ok(sequences)
}

/// Writes the sequences as a sequential PAML alignment: a ` N L` header followed by
/// name and sequence lines. Sequences are written in the given order, existing files are
/// overwritten.
///
/// # Example
/// ```
/// use bio::io::fasta::Record;
/// use phylo_evol::io::write_paml_alignment;
/// let dir = tempfile::tempdir().unwrap();
/// let path = dir.path().join("algn");
/// let sequences = vec![
///    Record::with_attrs("Homo", None, b"ATGGCC"),
///    Record::with_attrs("Pan", None, b"ATGGCT"),
/// ];
/// write_paml_alignment(&sequences, &path).unwrap();
/// let content = std::fs::read_to_string(path).unwrap();
/// assert_eq!(content, " 2 6\nHomo\nATGGCC\nPan\nATGGCT\n");
/// ```
pub fn write_paml_alignment(sequences: &[Record], path: &Path) -> Result<()> {
    info!("Writing PAML alignment to file {}", path.display());
    let length = sequences.first().map(|rec| rec.seq().len()).unwrap_or(0);
    let mut writer = File::create(path)?;
    writeln!(writer, " {} {}", sequences.len(), length)?;
    for rec in sequences {
        writeln!(writer, "{}", rec.id())?;
        writer.write_all(rec.seq())?;
        writer.write_all(b"\n")?;
    }
    info!("Finished writing successfully");
    Ok(())
}

/// Reads newick trees from a file, returning a vector of trees.
///
/// Unrooted trees keep their trifurcating root node, which is what codeml expects.
///
/// # Arguments
/// * `path` - Path to the newick file.
///
/// # Example
/// ```
/// use phylo_evol::io::read_newick_from_file;
/// use std::path::PathBuf;
/// let trees = read_newick_from_file(&PathBuf::from("./data/apes.newick")).unwrap();
/// # assert_eq!(trees.len(), 1);
/// # assert_eq!(trees[0].leaves().len(), 5);
/// ```
pub fn read_newick_from_file(path: &Path) -> Result<Vec<Tree>> {
    info!("Reading newick trees from file {}", path.display());
    let newick = fs::read_to_string(path)?;
    info!("Read file successfully");
    tree_parser::from_newick(&newick)
}

/// Writes newick trees to the given file path. Will return an error if the file already exists.
///
/// # Arguments
/// * `trees` - Vector of newick trees.
/// * `path` - Path to the newick file.
pub fn write_newick_to_file(trees: &[Tree], path: &Path) -> Result<()> {
    info!("Writing newick trees to file {}", path.display());
    if path.exists() {
        bail!(DataError {
            message: String::from("File already exists")
        });
    }
    let mut writer = File::create(path)?;
    for tree in trees {
        writer.write_all(tree.to_newick().as_bytes())?;
        writer.write_all(b"\n")?;
    }
    info!("Finished writing successfully");
    Ok(())
}
