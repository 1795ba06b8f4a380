use stepline_types::{Arrangement, Cursor, IterationCounts, NodeId};

/// Move `cursor` off a finished section.
///
/// Returns false when the song has run out: the cursor is left on the first
/// section so a wrapping caller can carry on from there. A group that still
/// has repeats left, or that is `looped`, sends the cursor back to its first
/// section; an exhausted group is left and the walk continues one level up.
pub fn play_move(
    cursor: &mut Cursor,
    arrangement: &Arrangement,
    counts: &mut IterationCounts,
    looped: Option<NodeId>,
) -> bool {
    loop {
        if cursor.len() <= 1 {
            cursor.move_next(arrangement);
            return false;
        }

        if !cursor.is_last_sibling(arrangement) && cursor.move_to_sibling(arrangement) {
            cursor.reset_iterations(arrangement, counts);
            return true;
        }

        let Some(parent) = cursor.parent() else {
            return false;
        };
        counts.increment(parent);
        if cursor.has_parent_iterations(arrangement, counts) || looped == Some(parent) {
            cursor.move_to_first_sibling(arrangement);
            return true;
        }

        cursor.reset_iterations(arrangement, counts);
        cursor.up();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepline_types::SongSection;

    /// root: [A, G(2): [B, C], D]
    fn nested() -> (Arrangement, [NodeId; 6]) {
        let mut arr = Arrangement::new();
        let root = arr.root();
        let a = arr.add_section(root, SongSection::new(0)).unwrap();
        let g = arr.add_group(root, 2).unwrap();
        let b = arr.add_section(g, SongSection::new(1)).unwrap();
        let c = arr.add_section(g, SongSection::new(2)).unwrap();
        let d = arr.add_section(root, SongSection::new(3)).unwrap();
        (arr, [root, a, g, b, c, d])
    }

    fn visit_order(arr: &Arrangement, looped: Option<NodeId>, moves: usize) -> Vec<Option<NodeId>> {
        let mut counts = IterationCounts::seeded(arr);
        let mut cursor = Cursor::first_section(arr);
        let mut visited = vec![cursor.current()];
        for _ in 0..moves {
            if !play_move(&mut cursor, arr, &mut counts, looped) {
                visited.push(None);
                break;
            }
            visited.push(cursor.current());
        }
        visited
    }

    #[test]
    fn single_section_song_ends_after_one_pass() {
        let arr = Arrangement::from_sections([SongSection::new(0)]);
        let first = arr.children(arr.root())[0];
        let mut counts = IterationCounts::seeded(&arr);
        let mut cursor = Cursor::first_section(&arr);
        assert!(!play_move(&mut cursor, &arr, &mut counts, None));
        assert!(cursor.matches(first));
    }

    #[test]
    fn nested_group_repeats_before_moving_on() {
        let (arr, [_, a, _, b, c, d]) = nested();
        let order = visit_order(&arr, None, 10);
        assert_eq!(
            order,
            vec![Some(a), Some(b), Some(c), Some(b), Some(c), Some(d), None]
        );
    }

    #[test]
    fn looped_root_wraps_forever() {
        let (arr, [root, a, _, b, c, d]) = nested();
        let order = visit_order(&arr, Some(root), 12);
        assert_eq!(
            &order[..12],
            &[
                Some(a), Some(b), Some(c), Some(b), Some(c), Some(d),
                Some(a), Some(b), Some(c), Some(b), Some(c), Some(d),
            ]
        );
        assert!(!order.contains(&None));
    }

    #[test]
    fn looped_group_never_exits() {
        let (arr, [_, _, g, b, c, _]) = nested();
        let mut counts = IterationCounts::seeded(&arr);
        let mut cursor = Cursor::from_path(vec![arr.root(), g, b]);
        for i in 0..9 {
            assert!(play_move(&mut cursor, &arr, &mut counts, Some(g)));
            let expected = if i % 2 == 0 { c } else { b };
            assert!(cursor.matches(expected));
        }
    }

    #[test]
    fn exhausted_group_counter_is_zeroed_on_exit() {
        let (arr, [_, _, g, b, c, _]) = nested();
        let mut counts = IterationCounts::seeded(&arr);
        let mut cursor = Cursor::from_path(vec![arr.root(), g, b]);
        play_move(&mut cursor, &arr, &mut counts, None);
        assert!(cursor.matches(c));
        play_move(&mut cursor, &arr, &mut counts, None);
        assert_eq!(counts.get(g), 1);
        play_move(&mut cursor, &arr, &mut counts, None);
        play_move(&mut cursor, &arr, &mut counts, None);
        assert_eq!(counts.get(g), 0);
    }

    #[test]
    fn empty_trailing_group_is_skipped() {
        let mut arr = Arrangement::new();
        let root = arr.root();
        let a = arr.add_section(root, SongSection::new(0)).unwrap();
        arr.add_group(root, 1).unwrap();
        let mut counts = IterationCounts::seeded(&arr);
        let mut cursor = Cursor::first_section(&arr);
        assert!(!play_move(&mut cursor, &arr, &mut counts, None));
        assert!(cursor.matches(a));
    }
}
