//! Fractional sibling order keys.
//!
//! Keys are plain `f64`s compared within one sibling group. New keys are
//! squeezed between neighbours, so a move touches exactly one row. When two
//! neighbours get so close that no representable key fits between them the
//! allocator refuses with [`OrderError::RenumberRequired`] and the caller
//! resequences the group (see [`resequence`]).

/// Spacing used for appends and for fresh resequencing.
pub const BUFFER: f64 = 100.0;

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum OrderError {
    #[error("no order key fits at position {position}; the sibling group must be renumbered")]
    RenumberRequired { position: usize },

    #[error("position {index} is out of range for {len} siblings")]
    OutOfRange { index: usize, len: usize },
}

/// Key for an item added after every existing sibling.
pub fn append_key(existing: impl IntoIterator<Item = f64>) -> Result<f64, OrderError> {
    let mut count = 0;
    let max = existing.into_iter().fold(None, |acc: Option<f64>, k| {
        count += 1;
        Some(acc.map_or(k, |m| m.max(k)))
    });
    let Some(max) = max else {
        return Ok(BUFFER);
    };

    let key = max + BUFFER;
    if key > max && key.is_finite() {
        Ok(key)
    } else {
        Err(OrderError::RenumberRequired { position: count })
    }
}

/// Key for a new item inserted at `position` of the ascending `keys`.
///
/// `position == keys.len()` appends.
pub fn insert_key(keys: &[f64], position: usize) -> Result<f64, OrderError> {
    let len = keys.len();
    if position > len {
        return Err(OrderError::OutOfRange {
            index: position,
            len,
        });
    }

    let prev = position.checked_sub(1).map(|i| keys[i]);
    let next = keys.get(position).copied();

    let key = match (prev, next) {
        (Some(p), Some(n)) => p + (n - p) / 2.0,
        (Some(p), None) => p + BUFFER,
        (None, Some(n)) => n / 2.0,
        (None, None) => BUFFER,
    };

    let above_prev = prev.map_or(true, |p| key > p);
    let below_next = next.map_or(true, |n| key < n);
    if above_prev && below_next && key.is_finite() {
        Ok(key)
    } else {
        Err(OrderError::RenumberRequired { position })
    }
}

/// Key for moving the item at `source` to `destination`, both indexes into
/// the ascending `keys` as they are before the move.
///
/// | destination          | key                                   |
/// |----------------------|---------------------------------------|
/// | `0`                  | `keys[0] / 2`                         |
/// | last                 | `keys[last] + BUFFER`                 |
/// | interior, from above | midpoint of `keys[d]` and `keys[d+1]` |
/// | interior, from below | midpoint of `keys[d-1]` and `keys[d]` |
///
/// `source == destination` returns the current key unchanged.
pub fn move_key(keys: &[f64], source: usize, destination: usize) -> Result<f64, OrderError> {
    let len = keys.len();
    for index in [source, destination] {
        if index >= len {
            return Err(OrderError::OutOfRange { index, len });
        }
    }
    if source == destination {
        return Ok(keys[source]);
    }

    // Same as taking the item out and inserting it into the remaining list.
    let mut rest = keys.to_vec();
    rest.remove(source);
    insert_key(&rest, destination)
}

/// Evenly spaced keys for a group of `count` siblings.
pub fn resequence(count: usize) -> Vec<f64> {
    (1..=count).map(|i| i as f64 * BUFFER).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted_position(keys: &[f64], moving: usize, new_key: f64) -> usize {
        let mut rest: Vec<(f64, bool)> = keys
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != moving)
            .map(|(_, k)| (*k, false))
            .collect();
        rest.push((new_key, true));
        rest.sort_by(|a, b| a.0.total_cmp(&b.0));
        rest.iter().position(|(_, m)| *m).unwrap()
    }

    #[test]
    fn test_append_key_defaults_to_buffer() {
        assert_eq!(append_key(Vec::new()).unwrap(), BUFFER);
        assert_eq!(append_key([100.0, 300.0, 200.0]).unwrap(), 400.0);
    }

    #[test]
    fn test_move_scenarios_from_three_keys() {
        let keys = [100.0, 200.0, 300.0];
        assert_eq!(move_key(&keys, 0, 2).unwrap(), 400.0);
        assert_eq!(move_key(&keys, 2, 0).unwrap(), 50.0);
        assert_eq!(move_key(&keys, 2, 1).unwrap(), 150.0);
        assert_eq!(move_key(&keys, 0, 1).unwrap(), 250.0);
    }

    #[test]
    fn test_move_same_index_keeps_key() {
        assert_eq!(move_key(&[100.0, 200.0], 1, 1).unwrap(), 200.0);
    }

    #[test]
    fn test_move_out_of_range() {
        assert_eq!(
            move_key(&[100.0], 0, 3),
            Err(OrderError::OutOfRange { index: 3, len: 1 })
        );
    }

    #[test]
    fn test_every_move_lands_at_destination_after_sorting() {
        let keys = [10.0, 35.0, 100.0, 101.0, 250.0, 900.0];
        for source in 0..keys.len() {
            for destination in 0..keys.len() {
                if source == destination {
                    continue;
                }
                let key = move_key(&keys, source, destination).unwrap();
                assert_eq!(
                    sorted_position(&keys, source, key),
                    destination,
                    "move {source} -> {destination} produced {key}"
                );
            }
        }
    }

    #[test]
    fn test_insert_key_stays_strictly_between_neighbours() {
        let keys = [100.0, 200.0, 300.0];
        for position in 0..=keys.len() {
            let key = insert_key(&keys, position).unwrap();
            if position > 0 {
                assert!(key > keys[position - 1]);
            }
            if position < keys.len() {
                assert!(key < keys[position]);
            }
        }
        assert!(insert_key(&keys, 5).is_err());
    }

    #[test]
    fn test_repeated_midpoints_eventually_require_renumber() {
        let lo = 100.0;
        let mut hi = 200.0;
        let mut steps = 0;
        let err = loop {
            match insert_key(&[lo, hi], 1) {
                Ok(k) => {
                    hi = k;
                    steps += 1;
                }
                Err(e) => break e,
            }
        };
        assert_eq!(err, OrderError::RenumberRequired { position: 1 });
        assert!(steps > 30, "only {steps} insertions before exhaustion");
    }

    #[test]
    fn test_front_insert_at_zero_key_requires_renumber() {
        assert_eq!(
            insert_key(&[0.0, 100.0], 0),
            Err(OrderError::RenumberRequired { position: 0 })
        );
    }

    #[test]
    fn test_resequence_spacing() {
        assert_eq!(resequence(3), vec![100.0, 200.0, 300.0]);
        assert!(resequence(0).is_empty());
    }
}
