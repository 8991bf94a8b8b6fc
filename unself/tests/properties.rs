mod common;

use common::Fixture;
use proptest::prelude::*;
use unself::elf::SegmentType;
use unself::{convert, Options};

fn layout() -> impl Strategy<Value = (Vec<u64>, u8, bool)> {
    (
        prop::collection::vec(1u64..0x200, 1..4),
        any::<u8>(),
        any::<bool>(),
    )
}

/// Segment `i` lives at `0x1000 + i * 0x400` in the output and
/// `0x400 + i * 0x200` in the container. The container is long enough
/// to hold everything in front of the first segment.
fn fixture(sizes: &[u64], seed: u8) -> Fixture {
    let mut fixture = Fixture::new(0x1800);
    fixture.seed = seed;
    for (i, &size) in sizes.iter().enumerate() {
        fixture = fixture
            .segment(SegmentType::Load, 0x1000 + i as u64 * 0x400, size)
            .entry(i as u16, 0x400 + i as u64 * 0x200, size);
    }
    fixture
}

proptest! {
    #[test]
    fn entries_are_copied_verbatim((sizes, seed, align) in layout()) {
        let fixture = fixture(&sizes, seed);
        let input = fixture.build();
        let options = Options {
            align_output: align,
            patch_version_segment: false,
            patch_first_segment: false,
            ..Options::default()
        };
        let conversion = convert(&input, &options).unwrap();

        let last = sizes.len() as u64 - 1;
        let mut expected = 0x1000 + last * 0x400 + sizes[last as usize];
        if align {
            expected = (expected + 0xF) & !0xF;
        }
        prop_assert_eq!(conversion.output.len() as u64, expected);

        for entry in &fixture.entries {
            let ph = &fixture.program_headers[usize::from(entry.props.segment_index())];
            let src = entry.offset as usize..(entry.offset + entry.file_size) as usize;
            let dst = ph.offset as usize..(ph.offset + entry.file_size) as usize;
            prop_assert_eq!(&conversion.output[dst], &input[src]);
        }
    }

    #[test]
    fn conversion_is_deterministic((sizes, seed, align) in layout()) {
        let input = fixture(&sizes, seed).build();
        let options = Options {
            align_output: align,
            ..Options::default()
        };
        let first = convert(&input, &options).unwrap();
        let second = convert(&input, &options).unwrap();
        prop_assert_eq!(first.output, second.output);
        prop_assert_eq!(first.diagnostics, second.diagnostics);
    }
}
