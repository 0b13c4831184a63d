//! Integration tests for the format catalog and control table

use common::test_utils::{brightness_controls, catalog_from, create_frame_format, sample_catalog};
use common::{ControlTable, Dimension, Extremum, LookupError, PixelFormat};
use protocol::{ControlInterface, processing};

mod catalog {
    use super::*;

    #[test]
    fn test_sample_catalog_bounds() {
        let catalog = sample_catalog();
        assert_eq!(catalog.extremal(None, Dimension::Format, Extremum::Min), Some(1));
        assert_eq!(catalog.extremal(None, Dimension::Format, Extremum::Max), Some(1));
        assert_eq!(catalog.extremal(Some(1), Dimension::Frame, Extremum::Min), Some(1));
        assert_eq!(catalog.extremal(Some(1), Dimension::Frame, Extremum::Max), Some(2));
    }

    #[test]
    fn test_gapped_format_indices() {
        let catalog = catalog_from(vec![
            create_frame_format(1, 1, 640, 480),
            create_frame_format(3, 1, 320, 240),
        ]);
        let indices: Vec<u8> = catalog.format_indices().into_iter().collect();
        assert_eq!(indices, vec![1, 3]);
        assert!(catalog.lookup(2, 1).is_none());
        assert_eq!(catalog.lookup(3, 1).map(|entry| entry.width), Some(320));
    }

    #[test]
    fn test_display_mentions_pixel_format() {
        let entry = create_frame_format(1, 2, 1280, 720);
        let text = entry.to_string();
        assert!(text.contains("YUYV"));
        assert!(text.contains("1280x720"));
        assert_eq!(entry.pixel_format, PixelFormat::Yuyv);
    }
}

mod controls {
    use super::*;

    #[test]
    fn test_defaults_enable_processing_unit() {
        let table = ControlTable::with_defaults();
        let brightness = table
            .lookup(ControlInterface::ProcessingUnit, processing::BRIGHTNESS)
            .unwrap();
        assert_eq!(brightness.minimum, 0);
        assert_eq!(brightness.maximum, 255);
        assert_eq!(brightness.length, 4);

        assert!(table.entries().iter().any(|entry| !entry.enabled));
    }

    #[test]
    fn test_override_by_name() {
        let mut table = ControlTable::with_defaults();
        let zoom = table.by_name_mut("zoom_absolute").unwrap();
        zoom.enabled = true;
        zoom.maximum = 400;
        let zoom = table
            .lookup(ControlInterface::InputTerminal, protocol::camera::ZOOM_ABSOLUTE)
            .unwrap();
        assert_eq!(zoom.maximum, 400);
        assert!(table.by_name_mut("does_not_exist").is_none());
    }

    #[test]
    fn test_unknown_selector_is_missing() {
        let table = brightness_controls();
        assert_eq!(
            table.lookup(ControlInterface::ProcessingUnit, processing::HUE),
            Err(LookupError::Missing)
        );
    }
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn set_current_accepts_one_to_four_bytes(bytes in proptest::collection::vec(any::<u8>(), 0..8)) {
            let mut table = brightness_controls();
            let accepted = table.set_current(ControlInterface::ProcessingUnit, processing::BRIGHTNESS, &bytes);
            prop_assert_eq!(accepted, (1..=4).contains(&bytes.len()));

            let entry = &table.entries()[0];
            if accepted {
                let mut padded = [0u8; 4];
                padded[..bytes.len()].copy_from_slice(&bytes);
                prop_assert_eq!(entry.current_value, i32::from_le_bytes(padded));
                prop_assert_eq!(entry.length as usize, bytes.len());
            } else {
                prop_assert_eq!(entry.current_value, 50);
            }
            prop_assert_eq!(entry.minimum, 0);
            prop_assert_eq!(entry.maximum, 100);
        }

        #[test]
        fn extremal_bounds_every_entry(frames in proptest::collection::vec((1u8..5, 1u8..5), 1..12)) {
            let catalog = catalog_from(
                frames.iter().map(|&(format, frame)| create_frame_format(format, frame, 640, 480)).collect(),
            );
            let min = catalog.extremal(None, Dimension::Format, Extremum::Min).unwrap();
            let max = catalog.extremal(None, Dimension::Format, Extremum::Max).unwrap();
            for entry in catalog.entries() {
                prop_assert!(entry.format_index >= min && entry.format_index <= max);
            }
        }
    }
}
