//! Logical type name registry.
//!
//! Maps the logical type name stored with each event to a decoder for the
//! concrete payload struct, which is then converted into the aggregate's
//! event type. The registry is an ordinary value built once during wiring
//! and shared by `Arc`; there is no process-wide registration.

use crate::errors::{CodecError, CodecResult};
use crate::serialization::format;
use crate::types::ContentType;
use serde::de::DeserializeOwned;
use std::collections::HashMap;

/// Decodes one registered payload type and converts it into `E`.
type DecodeFn<E> = fn(&str, &[u8], ContentType) -> CodecResult<E>;

fn decode_as<T, E>(event_type: &str, data: &[u8], content_type: ContentType) -> CodecResult<E>
where
    T: DeserializeOwned + Into<E>,
{
    format::decode::<T>(event_type, data, content_type).map(Into::into)
}

/// Table from logical type name to payload decoder.
///
/// # Example
///
/// ```rust,ignore
/// let registry = TypeRegistry::<OrderEvent>::new()
///     .with_type::<OrderCreated>("OrderCreated")?
///     .with_type::<OrderShipped>("OrderShipped")?;
/// ```
pub struct TypeRegistry<E> {
    decoders: HashMap<String, DecodeFn<E>>,
}

impl<E> TypeRegistry<E> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Registers payload type `T` under `event_type`.
    ///
    /// Fails with [`CodecError::TypeNameConflict`] if the name is taken.
    pub fn register<T>(&mut self, event_type: &str) -> CodecResult<()>
    where
        T: DeserializeOwned + Into<E> + 'static,
    {
        if self.decoders.contains_key(event_type) {
            return Err(CodecError::TypeNameConflict(event_type.to_string()));
        }
        self.decoders.insert(event_type.to_string(), decode_as::<T, E>);
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    pub fn with_type<T>(mut self, event_type: &str) -> CodecResult<Self>
    where
        T: DeserializeOwned + Into<E> + 'static,
    {
        self.register::<T>(event_type)?;
        Ok(self)
    }

    /// Checks if a logical type name is registered.
    pub fn is_registered(&self, event_type: &str) -> bool {
        self.decoders.contains_key(event_type)
    }

    /// All registered names, sorted.
    pub fn registered_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.decoders.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Decodes `data` as the payload registered under `event_type`.
    pub fn decode(
        &self,
        event_type: &str,
        data: &[u8],
        content_type: ContentType,
    ) -> CodecResult<E> {
        let decode = self
            .decoders
            .get(event_type)
            .ok_or_else(|| CodecError::UnknownEventType(event_type.to_string()))?;
        decode(event_type, data, content_type)
    }
}

impl<E> Default for TypeRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for TypeRegistry<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.registered_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct Opened {
        owner: String,
    }

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct Closed {
        reason: String,
    }

    #[derive(Debug, Clone, PartialEq)]
    enum AccountEvent {
        Opened(Opened),
        Closed(Closed),
    }

    impl From<Opened> for AccountEvent {
        fn from(event: Opened) -> Self {
            Self::Opened(event)
        }
    }

    impl From<Closed> for AccountEvent {
        fn from(event: Closed) -> Self {
            Self::Closed(event)
        }
    }

    fn registry() -> TypeRegistry<AccountEvent> {
        TypeRegistry::new()
            .with_type::<Opened>("AccountOpened")
            .and_then(|r| r.with_type::<Closed>("AccountClosed"))
            .unwrap()
    }

    #[test]
    fn dispatches_on_logical_name() {
        let registry = registry();

        let event = registry
            .decode("AccountClosed", br#"{"reason":"fraud"}"#, ContentType::Json)
            .unwrap();

        assert_eq!(
            event,
            AccountEvent::Closed(Closed {
                reason: "fraud".to_string()
            })
        );
    }

    #[test]
    fn unknown_names_are_rejected() {
        let error = registry()
            .decode("AccountFrozen", b"{}", ContentType::Json)
            .unwrap_err();

        assert_eq!(error, CodecError::UnknownEventType("AccountFrozen".to_string()));
    }

    #[test]
    fn payload_of_wrong_shape_fails_to_decode() {
        let error = registry()
            .decode("AccountOpened", br#"{"reason":"fraud"}"#, ContentType::Json)
            .unwrap_err();

        assert!(matches!(error, CodecError::DeserializationFailed { .. }));
    }

    #[test]
    fn duplicate_names_conflict() {
        let mut registry = registry();

        let error = registry.register::<Closed>("AccountOpened").unwrap_err();

        assert_eq!(error, CodecError::TypeNameConflict("AccountOpened".to_string()));
        assert_eq!(registry.registered_types(), vec!["AccountClosed", "AccountOpened"]);
    }
}
