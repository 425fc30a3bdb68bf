//! `{XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX}` rendering of folder and trigger IDs.

use serde::Serializer;
use uuid::Uuid;

/// Upper-case braced form, as the registry and shell print folder IDs.
pub fn braced(id: &Uuid) -> String {
    format!("{:X}", id.braced())
}

/// Accepts the hyphenated form with or without braces.
pub fn parse(s: &str) -> Option<Uuid> {
    Uuid::parse_str(s.trim()).ok()
}

#[allow(clippy::missing_errors_doc)]
pub fn serialize<S: Serializer>(id: &Uuid, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&braced(id))
}

#[allow(clippy::missing_errors_doc, clippy::ref_option)]
pub fn serialize_opt<S: Serializer>(id: &Option<Uuid>, serializer: S) -> Result<S::Ok, S::Error> {
    match id {
        Some(id) => serializer.serialize_some(&braced(id)),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{braced, parse};

    #[test]
    fn parse_and_braced_agree() {
        let g = parse(" {FDD39AD0-238F-46AF-ADB4-6C85480369C7} ");
        assert_eq!(g, Some(Uuid::from_u128(0xFDD3_9AD0_238F_46AF_ADB4_6C85_4803_69C7)));
        let Some(g) = g else {
            return;
        };
        assert_eq!(braced(&g), "{FDD39AD0-238F-46AF-ADB4-6C85480369C7}");
        assert_eq!(parse("fdd39ad0-238f-46af-adb4-6c85480369c7"), Some(g));
    }

    #[test]
    fn native_bytes_use_little_endian_leading_fields() {
        let g = Uuid::from_u128(0x0102_0304_0506_0708_090A_0B0C_0D0E_0F10);
        let b = g.to_bytes_le();
        assert_eq!(&b[0..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&b[4..6], &[0x06, 0x05]);
        assert_eq!(&b[8..16], &[0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F, 0x10]);
        assert_eq!(Uuid::from_bytes_le(b), g);
    }

    #[test]
    fn parse_rejects_bad_shapes() {
        assert_eq!(parse("not-a-guid"), None);
        assert_eq!(parse("{FDD39AD0-238F-46AF-ADB4-6C85480369}"), None);
        assert_eq!(parse("ZDD39AD0-238F-46AF-ADB4-6C85480369C7"), None);
    }
}
