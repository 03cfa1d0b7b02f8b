//! Turns collected denials into `allow` rule suggestions.

use std::collections::HashSet;

use crate::{
    avc::AvcRecord,
    sink::{LogSink, SinkError},
};

/// Name of the generated rules file, without extension.
pub const RULES_FILE_NAME: &str = "sepolicy.gen";

/// Give every record the permissions of all the other records describing the same denial.
///
/// Every ordered pair is visited once; there is no iteration to a fixed point.
pub fn merge(records: &mut [AvcRecord]) {
    for i in 0..records.len() {
        for j in 0..records.len() {
            if i == j || !records[i].same_denial(&records[j]) {
                continue;
            }
            let other = records[j].clone();
            records[i].merge(&other);
        }
    }
}

/// `allow <source> <target>:<class> { <permissions> };`
pub fn render(record: &AvcRecord) -> String {
    let permissions: Vec<&str> = record.permissions.iter().map(String::as_str).collect();
    format!(
        "allow {} {}:{} {{ {} }};",
        record.source.type_,
        record.target.type_,
        record.class,
        permissions.join(" ")
    )
}

/// Drop repeated lines, keeping the first occurrence of each.
pub fn dedup(lines: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    lines
        .into_iter()
        .filter(|line| seen.insert(line.clone()))
        .collect()
}

pub fn correlate(mut records: Vec<AvcRecord>) -> Vec<String> {
    merge(&mut records);
    dedup(records.iter().map(render).collect())
}

/// Write one rule per line. An empty `rules` leaves no file once `sink` is closed.
pub fn write_rules(rules: &[String], sink: &mut LogSink) -> Result<(), SinkError> {
    sink.open()?;
    for rule in rules {
        sink.write(rule)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::test_utils::TempDir;

    fn record(perms: &str, source: &str, target: &str, class: &str) -> AvcRecord {
        AvcRecord::parse(&format!(
            "avc: denied {{ {perms} }} for scontext=u:r:{source}:s0 tcontext=u:object_r:{target}:s0 tclass={class}"
        ))
        .unwrap()
    }

    #[test]
    fn same_denial_merges_into_one_rule() {
        let rules = correlate(vec![
            record("read", "a", "b", "file"),
            record("write", "a", "b", "file"),
        ]);
        assert_eq!(rules, vec!["allow a b:file { read write };".to_string()]);
    }

    #[test]
    fn merge_order_does_not_matter() {
        let mut forward = vec![
            record("read", "a", "b", "file"),
            record("write", "a", "b", "file"),
        ];
        let mut backward = vec![forward[1].clone(), forward[0].clone()];
        merge(&mut forward);
        merge(&mut backward);

        assert_eq!(forward[0].permissions, backward[0].permissions);
        assert_eq!(forward[1].permissions, backward[1].permissions);
        assert_eq!(forward[0].permissions, forward[1].permissions);
    }

    #[test]
    fn three_partial_denials_merge() {
        let rules = correlate(vec![
            record("read", "a", "b", "file"),
            record("open", "a", "b", "file"),
            record("getattr", "a", "b", "file"),
        ]);
        assert_eq!(
            rules,
            vec!["allow a b:file { getattr open read };".to_string()]
        );
    }

    #[test]
    fn distinct_denials_keep_first_seen_order() {
        let rules = correlate(vec![
            record("search", "vold", "system_data_file", "dir"),
            record("read", "a", "b", "file"),
            record("search", "vold", "system_data_file", "dir"),
            record("read", "a", "b", "dir"),
        ]);
        assert_eq!(
            rules,
            vec![
                "allow vold system_data_file:dir { search };".to_string(),
                "allow a b:file { read };".to_string(),
                "allow a b:dir { read };".to_string(),
            ]
        );
    }

    #[test]
    fn different_levels_are_not_merged() {
        let mut records = vec![
            AvcRecord::parse(
                "avc: denied { read } for scontext=u:r:a:s0 tcontext=u:r:b:s0 tclass=file",
            )
            .unwrap(),
            AvcRecord::parse(
                "avc: denied { write } for scontext=u:r:a:s0:c512,c768 tcontext=u:object_r:b:s0 tclass=file",
            )
            .unwrap(),
        ];
        merge(&mut records);
        assert_eq!(records[0].permissions.len(), 1);
        assert_eq!(records[1].permissions.len(), 1);

        assert_eq!(
            dedup(records.iter().map(render).collect()),
            vec![
                "allow a b:file { read };".to_string(),
                "allow a b:file { write };".to_string(),
            ]
        );
    }

    #[test]
    fn dedup_preserves_order() {
        let lines = ["b", "a", "b", "c", "a"].map(String::from).to_vec();
        assert_eq!(dedup(lines), vec!["b", "a", "c"]);
    }

    #[test]
    fn rules_are_written_line_by_line() {
        let dir = TempDir::new("correlator-write").unwrap();
        let rules = correlate(vec![
            record("read", "a", "b", "file"),
            record("ioctl", "hal_camera", "video_device", "chr_file"),
        ]);
        {
            let mut sink = LogSink::new(&dir, RULES_FILE_NAME, false);
            write_rules(&rules, &mut sink).unwrap();
        }
        assert_eq!(
            fs::read_to_string(dir.join("sepolicy.gen.txt")).unwrap(),
            "allow a b:file { read };\nallow hal_camera video_device:chr_file { ioctl };\n"
        );
    }

    #[test]
    fn no_rules_no_file() {
        let dir = TempDir::new("correlator-empty").unwrap();
        {
            let mut sink = LogSink::new(&dir, RULES_FILE_NAME, false);
            write_rules(&correlate(Vec::new()), &mut sink).unwrap();
        }
        assert!(!dir.join("sepolicy.gen.txt").exists());
    }
}
