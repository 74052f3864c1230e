//! MicroVM identity.
//!
//! A [`VmId`] names one microVM on the host. It is the key for the work
//! queue, the repository and every VM-scoped host resource (state
//! directories, image leases, interfaces).

use crate::IdError;

/// Namespace used when callers do not provide one.
pub const DEFAULT_NAMESPACE: &str = "default";

const SEPARATOR: char = '/';

/// Identifier of a microVM: `{namespace}/{name}` plus an optional stable UID.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VmId {
    name: String,
    namespace: String,
    uid: Option<String>,
}

impl VmId {
    /// Creates a VM ID.
    ///
    /// An empty namespace falls back to [`DEFAULT_NAMESPACE`]; an empty
    /// UID is treated as absent. No component may contain `/`, so the
    /// string form always parses back to the same ID.
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        uid: Option<String>,
    ) -> Result<Self, IdError> {
        let name = name.into();
        if name.is_empty() {
            return Err(IdError::NameRequired);
        }

        let mut namespace = namespace.into();
        if namespace.is_empty() {
            namespace = DEFAULT_NAMESPACE.to_string();
        }

        let uid = uid.filter(|u| !u.is_empty());
        if [name.as_str(), namespace.as_str(), uid.as_deref().unwrap_or_default()]
            .iter()
            .any(|part| part.contains(SEPARATOR))
        {
            return Err(IdError::InvalidFormat {
                actual: match &uid {
                    Some(uid) => format!("{namespace}/{name}/{uid}"),
                    None => format!("{namespace}/{name}"),
                },
            });
        }

        Ok(Self {
            name,
            namespace,
            uid,
        })
    }

    /// Parses `namespace/name` or `namespace/name/uid`.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }

        let parts: Vec<&str> = s.split(SEPARATOR).collect();
        let (namespace, name, uid) = match parts.as_slice() {
            [namespace, name] => (*namespace, *name, None),
            [namespace, name, uid] => {
                if uid.is_empty() {
                    return Err(IdError::UidRequired);
                }
                (*namespace, *name, Some((*uid).to_string()))
            }
            _ => {
                return Err(IdError::InvalidFormat {
                    actual: s.to_string(),
                })
            }
        };

        if namespace.is_empty() {
            return Err(IdError::NamespaceRequired);
        }
        if name.is_empty() {
            return Err(IdError::NameRequired);
        }

        Ok(Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            uid,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn uid(&self) -> Option<&str> {
        self.uid.as_deref()
    }

    /// Returns a copy of this ID carrying the given UID.
    pub fn with_uid(&self, uid: impl Into<String>) -> Result<Self, IdError> {
        Self::new(self.name.clone(), self.namespace.clone(), Some(uid.into()))
    }
}

impl std::fmt::Display for VmId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.uid {
            Some(uid) => write!(f, "{}/{}/{}", self.namespace, self.name, uid),
            None => write!(f, "{}/{}", self.namespace, self.name),
        }
    }
}

impl std::str::FromStr for VmId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for VmId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for VmId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_display_without_uid() {
        let id = VmId::new("vm1", "ns", None).unwrap();
        assert_eq!(id.to_string(), "ns/vm1");
    }

    #[test]
    fn test_display_with_uid() {
        let id = VmId::new("vm1", "ns", Some("abc".to_string())).unwrap();
        assert_eq!(id.to_string(), "ns/vm1/abc");
        assert_eq!(id.uid(), Some("abc"));
    }

    #[test]
    fn test_default_namespace() {
        let id = VmId::new("vm1", "", None).unwrap();
        assert_eq!(id.namespace(), DEFAULT_NAMESPACE);
    }

    #[test]
    fn test_name_required() {
        assert_eq!(VmId::new("", "ns", None), Err(IdError::NameRequired));
    }

    #[test]
    fn test_empty_uid_is_absent() {
        let id = VmId::new("vm1", "ns", Some(String::new())).unwrap();
        assert_eq!(id.uid(), None);
        assert_eq!(id.to_string(), "ns/vm1");
    }

    #[test]
    fn test_separator_rejected_in_components() {
        for (name, ns, uid) in [
            ("a/b", "ns", None),
            ("vm1", "tenant/a", None),
            ("vm1", "ns", Some("u/1".to_string())),
        ] {
            assert!(matches!(
                VmId::new(name, ns, uid),
                Err(IdError::InvalidFormat { .. })
            ));
        }
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(VmId::parse(""), Err(IdError::Empty));
        assert_eq!(VmId::parse("/vm1"), Err(IdError::NamespaceRequired));
        assert_eq!(VmId::parse("ns/"), Err(IdError::NameRequired));
        assert_eq!(VmId::parse("ns/vm1/"), Err(IdError::UidRequired));
        assert!(matches!(
            VmId::parse("vm1"),
            Err(IdError::InvalidFormat { .. })
        ));
        assert!(matches!(
            VmId::parse("a/b/c/d"),
            Err(IdError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_equality_covers_uid() {
        let a = VmId::parse("ns/vm1").unwrap();
        let b = VmId::parse("ns/vm1/uid").unwrap();
        assert_ne!(a, b);
        assert_eq!(a.with_uid("uid").unwrap(), b);
        assert!(a.with_uid("u/id").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let id = VmId::parse("ns/vm1/uid").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"ns/vm1/uid\"");
        let back: VmId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    proptest! {
        #[test]
        fn prop_parse_display_roundtrip(
            ns in "[a-z][a-z0-9-]{0,15}",
            name in "[a-z][a-z0-9-]{0,15}",
            uid in proptest::option::of("[A-Z0-9]{26}"),
        ) {
            let id = VmId::new(name.clone(), ns.clone(), uid.clone()).unwrap();
            let parsed = VmId::parse(&id.to_string()).unwrap();
            prop_assert_eq!(parsed.name(), name.as_str());
            prop_assert_eq!(parsed.namespace(), ns.as_str());
            prop_assert_eq!(parsed.uid(), uid.as_deref());
            prop_assert_eq!(parsed, id);
        }

        #[test]
        fn prop_constructed_ids_roundtrip(
            ns in "[a-z/]{0,6}",
            name in "[a-z/]{0,6}",
            uid in proptest::option::of("[A-Z/]{0,4}"),
        ) {
            if let Ok(id) = VmId::new(name, ns, uid) {
                prop_assert_eq!(VmId::parse(&id.to_string()), Ok(id));
            }
        }
    }
}
