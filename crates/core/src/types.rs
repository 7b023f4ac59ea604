use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! newtype_string {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string value.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Return the inner string as a str slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns `true` if the identifier is the empty string.
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;

            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(
    ServiceId,
    "Identifies a deployment that survives redeployments; scopes channel names and state keys."
);
newtype_string!(
    ClusterId,
    "Identifies a single deployment of a service; used for cluster-lifetime state."
);
newtype_string!(ProviderName, "The configured name of a stream or storage provider.");
newtype_string!(StreamNamespace, "The namespace half of a stream identity.");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newtype_from_str() {
        let ns = StreamNamespace::from("chat-rooms");
        assert_eq!(ns.as_str(), "chat-rooms");
        assert_eq!(&*ns, "chat-rooms");
    }

    #[test]
    fn newtype_from_string() {
        let service = ServiceId::from("billing".to_string());
        assert_eq!(service.to_string(), "billing");
    }

    #[test]
    fn newtype_serde_is_transparent() {
        let id = ProviderName::new("redis-streams");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"redis-streams\"");
        let back: ProviderName = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn empty_detection() {
        assert!(ClusterId::new("").is_empty());
        assert!(!ClusterId::new("c1").is_empty());
    }
}
