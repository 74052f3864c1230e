use ulid::Ulid;

use crate::models::IfaceType;

const TAP_PREFIX: &str = "kt";
const MACVTAP_PREFIX: &str = "kvt";
const SUFFIX_LEN: usize = 7;

/// Generates a random host device name for an interface type.
pub fn new_iface_name(iface_type: IfaceType) -> String {
    let prefix = match iface_type {
        IfaceType::Tap => TAP_PREFIX,
        IfaceType::Macvtap => MACVTAP_PREFIX,
    };

    // The trailing characters of a ULID come from its random component.
    let id = Ulid::new().to_string().to_lowercase();
    format!("{prefix}{}", &id[id.len() - SUFFIX_LEN..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tap_name() {
        let name = new_iface_name(IfaceType::Tap);
        assert!(name.starts_with("kt"));
        assert_eq!(name.len(), 9);
        assert!(name.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_macvtap_name() {
        let name = new_iface_name(IfaceType::Macvtap);
        assert!(name.starts_with("kvt"));
        // IFNAMSIZ - 1
        assert!(name.len() <= 15);
    }

    #[test]
    fn test_names_differ() {
        assert_ne!(new_iface_name(IfaceType::Tap), new_iface_name(IfaceType::Tap));
    }
}
