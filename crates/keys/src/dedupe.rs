use std::collections::HashMap;

use crate::schema::Entry;

/// Collapse entries to one per character.
///
/// The survivor is the entry with the strictly greatest raw counter; on a tie
/// the first one seen is kept.  Output follows first-seen order of names.
pub fn dedupe(entries: impl IntoIterator<Item = Entry>) -> Vec<Entry> {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut kept: Vec<Entry> = Vec::new();

    for entry in entries {
        match slots.get(&entry.character_name) {
            Some(&slot) => {
                if entry.raw_timestamp > kept[slot].raw_timestamp {
                    kept[slot] = entry;
                }
            }
            None => {
                slots.insert(entry.character_name.clone(), kept.len());
                kept.push(entry);
            }
        }
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SourceChannel;
    use chrono::Utc;
    use std::collections::HashSet;

    fn entry(name: &str, raw: u64, level: u32) -> Entry {
        Entry {
            character_name: name.to_string(),
            key_level: level,
            dungeon_id: 504,
            dungeon_name: "Darkflame Cleft".to_string(),
            raw_timestamp: raw,
            week: 419,
            resolved_timestamp: Utc::now(),
            source_channel: SourceChannel::Friends,
        }
    }

    #[test]
    fn keeps_greatest_raw_counter_per_character() {
        let out = dedupe(vec![entry("A", 10, 1), entry("A", 25, 2), entry("B", 5, 3)]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].character_name, "A");
        assert_eq!(out[0].raw_timestamp, 25);
        assert_eq!(out[1].character_name, "B");
        assert_eq!(out[1].raw_timestamp, 5);
    }

    #[test]
    fn later_lower_counter_does_not_replace() {
        let out = dedupe(vec![entry("A", 30, 1), entry("A", 20, 2)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].key_level, 1);
    }

    #[test]
    fn ties_keep_first_seen() {
        let out = dedupe(vec![entry("A", 7, 1), entry("A", 7, 2), entry("A", 7, 3)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].key_level, 1);
    }

    #[test]
    fn counters_compare_numerically_not_lexically() {
        let out = dedupe(vec![entry("A", 9, 1), entry("A", 10, 2)]);
        assert_eq!(out[0].raw_timestamp, 10);
    }

    #[test]
    fn output_has_one_entry_per_distinct_name() {
        let input: Vec<Entry> = (0..50)
            .map(|i| entry(&format!("C{}", i % 7), (i * 37 % 11) as u64, i as u32))
            .collect();
        let names: HashSet<String> = input.iter().map(|e| e.character_name.clone()).collect();
        let out = dedupe(input.clone());
        assert_eq!(out.len(), names.len());
        for survivor in &out {
            let max = input
                .iter()
                .filter(|e| e.character_name == survivor.character_name)
                .map(|e| e.raw_timestamp)
                .max()
                .unwrap();
            assert_eq!(survivor.raw_timestamp, max);
        }
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(dedupe(Vec::new()).is_empty());
    }
}
