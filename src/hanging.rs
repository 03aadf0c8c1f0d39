//! Mammography hanging order for the 2x2 layout: RCC, LCC, RMLO, LMLO.

use std::collections::VecDeque;

use crate::loader::StackMetadata;

const HANGING_CELLS: usize = 4;

fn normalize_token(value: Option<&str>) -> String {
    value
        .unwrap_or_default()
        .trim()
        .to_ascii_uppercase()
        .replace(' ', "")
}

pub fn classify_laterality(value: Option<&str>) -> Option<&'static str> {
    let token = normalize_token(value);
    if token.starts_with('R') || token.contains("RIGHT") {
        Some("R")
    } else if token.starts_with('L') || token.contains("LEFT") {
        Some("L")
    } else {
        None
    }
}

pub fn classify_view(value: Option<&str>) -> Option<&'static str> {
    match normalize_token(value).as_str() {
        "MLO" => Some("MLO"),
        "CC" => Some("CC"),
        _ => None,
    }
}

fn hanging_slot(metadata: &StackMetadata) -> Option<usize> {
    match (
        classify_view(metadata.view_position.as_deref()),
        classify_laterality(metadata.laterality.as_deref()),
    ) {
        (Some("CC"), Some("R")) => Some(0),
        (Some("CC"), Some("L")) => Some(1),
        (Some("MLO"), Some("R")) => Some(2),
        (Some("MLO"), Some("L")) => Some(3),
        _ => None,
    }
}

fn slots_for_laterality(laterality: Option<&str>) -> [usize; 4] {
    match laterality {
        Some("R") => [0, 2, 1, 3],
        Some("L") => [1, 3, 0, 2],
        _ => [0, 1, 2, 3],
    }
}

/// Pane order for opened stacks: the hanging order when exactly four stacks go into
/// four cells, open order otherwise. Returns indices into `stacks`.
pub fn hanging_order(stacks: &[&StackMetadata], cells: usize) -> Vec<usize> {
    if stacks.len() != HANGING_CELLS || cells != HANGING_CELLS {
        return (0..stacks.len()).collect();
    }

    let mut ordered: [Option<usize>; HANGING_CELLS] = [None; HANGING_CELLS];
    let mut fallback = VecDeque::new();
    for (index, metadata) in stacks.iter().enumerate() {
        let laterality = classify_laterality(metadata.laterality.as_deref());
        let slot = hanging_slot(metadata)
            .filter(|slot| ordered[*slot].is_none())
            .or_else(|| {
                slots_for_laterality(laterality)
                    .into_iter()
                    .find(|slot| ordered[*slot].is_none())
            });
        match slot {
            Some(slot) => ordered[slot] = Some(index),
            None => fallback.push_back(index),
        }
    }

    for slot in ordered.iter_mut() {
        if slot.is_none() {
            *slot = fallback.pop_front();
        }
    }
    ordered.into_iter().flatten().collect()
}

/// Short view code such as "RCC", when the metadata carries one.
pub fn view_code(metadata: &StackMetadata) -> Option<String> {
    let laterality = classify_laterality(metadata.laterality.as_deref());
    let view = classify_view(metadata.view_position.as_deref());
    match (laterality, view) {
        (Some(laterality), Some(view)) => Some(format!("{laterality}{view}")),
        (Some(code), None) | (None, Some(code)) => Some(code.to_string()),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(laterality: &str, position: &str) -> StackMetadata {
        StackMetadata {
            laterality: Some(laterality.to_string()),
            view_position: Some(position.to_string()),
            ..StackMetadata::default()
        }
    }

    #[test]
    fn four_views_hang_rcc_lcc_rmlo_lmlo() {
        let stacks = [
            view("L", "MLO"),
            view("R", "CC"),
            view("Left", "cc"),
            view("R", "MLO"),
        ];
        let refs: Vec<&StackMetadata> = stacks.iter().collect();
        assert_eq!(hanging_order(&refs, 4), vec![1, 2, 3, 0]);
    }

    #[test]
    fn duplicate_views_fall_back_to_free_cells() {
        let stacks = [
            view("R", "CC"),
            view("R", "CC"),
            StackMetadata::default(),
            view("L", "MLO"),
        ];
        let refs: Vec<&StackMetadata> = stacks.iter().collect();
        let order = hanging_order(&refs, 4);
        assert_eq!(order[0], 0);
        assert_eq!(order[3], 3);
        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2, 3]);
    }

    #[test]
    fn other_counts_keep_open_order() {
        let stacks = [view("L", "MLO"), view("R", "CC")];
        let refs: Vec<&StackMetadata> = stacks.iter().collect();
        assert_eq!(hanging_order(&refs, 4), vec![0, 1]);
        assert_eq!(hanging_order(&refs, 2), vec![0, 1]);
    }

    #[test]
    fn view_codes() {
        assert_eq!(view_code(&view("right", "MLO")).as_deref(), Some("RMLO"));
        assert_eq!(view_code(&StackMetadata::default()), None);
    }
}
