use super::conflict::{conflict, Sensitivity};
use super::WaveItem;

/// Greedy first-fit bin-packing of accepted proposals into conflict-free
/// waves (spec.md §4.4). Proposals are considered in the order given —
/// callers pass them pre-sorted by rank so higher-ranked proposals claim
/// the earliest wave they fit in.
///
/// Returns waves of item ids; every pair within a wave is conflict-free
/// under `sensitivity`.
pub fn partition_waves(
    items: &[WaveItem],
    sensitivity: Sensitivity,
    dependency_edges: &[(String, String)],
) -> Vec<Vec<String>> {
    let mut waves: Vec<Vec<usize>> = Vec::new();

    'item: for (idx, item) in items.iter().enumerate() {
        for wave in waves.iter_mut() {
            let fits = wave.iter().all(|&member_idx| {
                !conflict(item, &items[member_idx], sensitivity, dependency_edges)
            });
            if fits {
                wave.push(idx);
                continue 'item;
            }
        }
        waves.push(vec![idx]);
    }

    waves
        .into_iter()
        .map(|wave| wave.into_iter().map(|idx| items[idx].id.clone()).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, files: &[&str]) -> WaveItem {
        WaveItem {
            id: id.to_string(),
            files: files.iter().map(|f| f.to_string()).collect(),
            target_symbols: None,
            category: "bug".to_string(),
        }
    }

    #[test]
    fn disjoint_files_land_in_one_wave() {
        let items = vec![
            item("a", &["src/a.rs"]),
            item("b", &["src/b.rs"]),
            item("c", &["src/c.rs"]),
        ];
        let waves = partition_waves(&items, Sensitivity::Relaxed, &[]);
        assert_eq!(waves.len(), 1);
        assert_eq!(waves[0].len(), 3);
    }

    #[test]
    fn overlapping_files_split_across_waves() {
        let items = vec![
            item("a", &["src/lib.rs"]),
            item("b", &["src/lib.rs"]),
            item("c", &["src/other.rs"]),
        ];
        let waves = partition_waves(&items, Sensitivity::Relaxed, &[]);
        assert_eq!(waves.len(), 2);
        assert_eq!(waves[0], vec!["a".to_string(), "c".to_string()]);
        assert_eq!(waves[1], vec!["b".to_string()]);
    }

    #[test]
    fn no_two_items_in_a_wave_conflict() {
        let items = vec![
            item("a", &["src/mod/a.rs"]),
            item("b", &["src/mod/b.rs"]),
            item("c", &["src/other/c.rs"]),
            item("d", &["src/mod/a.rs"]),
        ];
        let waves = partition_waves(&items, Sensitivity::Normal, &[]);
        for wave in &waves {
            for i in 0..wave.len() {
                for j in (i + 1)..wave.len() {
                    let item_i = items.iter().find(|it| it.id == wave[i]).unwrap();
                    let item_j = items.iter().find(|it| it.id == wave[j]).unwrap();
                    assert!(!conflict(item_i, item_j, Sensitivity::Normal, &[]));
                }
            }
        }
    }
}
