//! Alignment length counting.
//!
//! The simulation stage needs the empirical sequence length when no replay
//! command is available. Only two formats matter here: FASTA (residues of
//! the first record, gaps included, wrapped lines concatenated) and
//! PHYLIP (second integer of the header line). Nothing else about the
//! alignment is read; the inference tool does all real alignment I/O.

use std::fs;
use std::path::Path;

use crate::invoke::PowerError;

/// Number of alignment columns in a FASTA or PHYLIP file.
pub fn count_sites(path: &Path) -> Result<usize, PowerError> {
    let text = fs::read_to_string(path)?;
    sites_in_text(&text).map_err(|reason| PowerError::Parse(format!("{}: {}", path.display(), reason)))
}

fn sites_in_text(text: &str) -> Result<usize, String> {
    let trimmed = text.trim_start();
    if trimmed.is_empty() {
        return Err("empty alignment file".to_string());
    }
    if trimmed.starts_with('>') {
        fasta_sites(trimmed)
    } else {
        phylip_sites(trimmed)
    }
}

/// Length of the first FASTA record. Gap characters count: sites are
/// columns, not residues.
fn fasta_sites(text: &str) -> Result<usize, String> {
    let mut count = 0;
    let mut in_first = false;
    for line in text.lines() {
        if line.starts_with('>') {
            if in_first {
                break;
            }
            in_first = true;
            continue;
        }
        if in_first {
            count += line.chars().filter(|c| !c.is_whitespace()).count();
        }
    }
    if count == 0 {
        return Err("first FASTA record has no sequence".to_string());
    }
    Ok(count)
}

/// Site count from a PHYLIP header line: `<taxa> <sites>`.
fn phylip_sites(text: &str) -> Result<usize, String> {
    let header = text.lines().next().unwrap_or("");
    let mut fields = header.split_whitespace();
    fields
        .next()
        .and_then(|t| t.parse::<usize>().ok())
        .ok_or("PHYLIP header: missing taxon count")?;
    let sites = fields
        .next()
        .and_then(|t| t.parse::<usize>().ok())
        .ok_or("PHYLIP header: missing site count")?;
    Ok(sites)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_fasta_single_line_record() {
        assert_eq!(sites_in_text(">seq1\nACGTACGT\n"), Ok(8));
    }

    #[test]
    fn test_fasta_wrapped_record_concatenates_lines() {
        assert_eq!(sites_in_text(">seq1\nACGT\nACGT\nAC\n"), Ok(10));
    }

    #[test]
    fn test_fasta_gap_columns_are_counted() {
        assert_eq!(sites_in_text(">seq1\nAC-T--GT\n"), Ok(8));
    }

    #[test]
    fn test_fasta_only_first_record_measured() {
        assert_eq!(sites_in_text(">a\nACGTACGT\n>b\nACGT\n"), Ok(8));
    }

    #[test]
    fn test_fasta_record_without_sequence_is_error() {
        assert!(sites_in_text(">a\n>b\nACGT\n").is_err());
    }

    #[test]
    fn test_phylip_header_second_field() {
        assert_eq!(sites_in_text(" 4 1000\ntaxon1  ACGT...\n"), Ok(1000));
    }

    #[test]
    fn test_phylip_bad_header_is_error() {
        assert!(sites_in_text("not a header\n").is_err());
        assert!(sites_in_text("4\n").is_err());
    }

    #[test]
    fn test_empty_file_is_error() {
        assert!(sites_in_text("").is_err());
        assert!(sites_in_text("   \n \n").is_err());
    }

    #[test]
    fn test_count_sites_reads_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("aln.fasta");
        fs::write(&path, ">s1\nACGTAC\n>s2\nACGTAC\n").unwrap();
        assert_eq!(count_sites(&path).unwrap(), 6);
    }

    #[test]
    fn test_count_sites_error_names_the_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.phy");
        fs::write(&path, "garbage header\n").unwrap();
        let err = count_sites(&path).unwrap_err();
        assert!(err.to_string().contains("bad.phy"), "error was: {}", err);
    }
}
