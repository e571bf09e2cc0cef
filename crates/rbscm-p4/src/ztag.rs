//! Parser for `p4 -ztag` output.
//!
//! Tagged output is a sequence of `... key value` lines. A record ends when a
//! key repeats (the next record has started); blank separators between
//! records are ignored. Lines that do not start with `... ` continue the
//! previous value, which is how multi-line change descriptions are printed.

use std::collections::BTreeMap;

/// One tagged record.
pub type Record = BTreeMap<String, String>;

const TAG_PREFIX: &str = "... ";

/// Split tagged output into records.
#[must_use]
pub fn parse(output: &str) -> Vec<Record> {
    let mut records = Vec::new();
    let mut current = Record::new();
    let mut last_key: Option<String> = None;

    for line in output.lines() {
        if let Some(rest) = line.strip_prefix(TAG_PREFIX) {
            let (key, value) = rest.split_once(' ').unwrap_or((rest, ""));
            if current.contains_key(key) {
                records.push(finish(std::mem::take(&mut current)));
            }
            current.insert(key.to_owned(), value.to_owned());
            last_key = Some(key.to_owned());
        } else if let Some(key) = &last_key
            && let Some(value) = current.get_mut(key)
        {
            value.push('\n');
            value.push_str(line);
        }
    }
    if !current.is_empty() {
        records.push(finish(current));
    }
    records
}

fn finish(mut record: Record) -> Record {
    for value in record.values_mut() {
        let trimmed = value.trim_end().len();
        value.truncate(trimmed);
    }
    record
}

/// Collect indexed fields (`depotFile0`, `depotFile1`, ...) in index order.
#[must_use]
pub fn indexed<'a>(record: &'a Record, prefix: &str) -> Vec<&'a str> {
    (0..)
        .map_while(|i| record.get(&format!("{prefix}{i}")).map(String::as_str))
        .collect()
}
