//! Reading the invocation event and parsing the out-of-band parameters.

use std::{fmt, io::Read, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{HarnessError, HarnessResult};

const SEPARATOR: char = '.';

/// A `module.symbol` pair naming a registered handler.
///
/// Only the last separator splits the two parts, so module paths may
/// themselves contain dots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandlerReference {
    module: String,
    symbol: String,
}

impl HandlerReference {
    pub fn new(module: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            symbol: symbol.into(),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }
}

impl FromStr for HandlerReference {
    type Err = HarnessError;

    fn from_str(reference: &str) -> Result<Self, Self::Err> {
        let (module, symbol) = reference.rsplit_once(SEPARATOR).ok_or_else(|| {
            HarnessError::invalid_reference(reference, "expected the format MODULE.SYMBOL")
        })?;

        if module.is_empty() || symbol.is_empty() {
            return Err(HarnessError::invalid_reference(
                reference,
                "module and symbol must both be non-empty",
            ));
        }

        Ok(Self::new(module, symbol))
    }
}

impl fmt::Display for HandlerReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.module, SEPARATOR, self.symbol)
    }
}

/// Context parameters taken positionally from the command line.
///
/// Nothing is validated beyond presence: a missing argument stays `None` and
/// is carried into the context as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationParams {
    pub function_name: Option<String>,
    pub memory_limit_in_mb: Option<u32>,
    pub timeout_seconds: Option<u64>,
}

/// Everything needed to run one invocation.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub event: Value,
    pub handler: HandlerReference,
    pub params: InvocationParams,
}

/// Reads `reader` to end-of-stream and parses the whole buffer as one JSON
/// document.
///
/// Parsing starts only after the stream closes; a document split across many
/// reads is accumulated first.
pub fn read_event<R: Read>(mut reader: R) -> HarnessResult<Value> {
    let mut buffer = Vec::new();
    reader.read_to_end(&mut buffer)?;
    Ok(serde_json::from_slice(&buffer)?)
}

/// Builds an [`InvocationRequest`] from the input stream and arguments.
///
/// The payload is parsed before the handler reference, so a malformed event
/// is reported even when the reference is also wrong.
pub fn load<R: Read>(
    reader: R,
    handler: &str,
    params: InvocationParams,
) -> HarnessResult<InvocationRequest> {
    let event = read_event(reader)?;
    let handler = handler.parse()?;

    Ok(InvocationRequest {
        event,
        handler,
        params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io;

    /// Hands out its input one byte per read.
    struct Trickle<'a>(&'a [u8]);

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.split_first() {
                Some((byte, rest)) if !buf.is_empty() => {
                    buf[0] = *byte;
                    self.0 = rest;
                    Ok(1)
                }
                _ => Ok(0),
            }
        }
    }

    #[test]
    fn test_rightmost_split() {
        let reference: HandlerReference = "a.b.c".parse().unwrap();
        assert_eq!(reference.module(), "a.b");
        assert_eq!(reference.symbol(), "c");

        let reference: HandlerReference = "a.b".parse().unwrap();
        assert_eq!(reference.module(), "a");
        assert_eq!(reference.symbol(), "b");
    }

    #[test]
    fn test_reference_display_round_trips_deep_modules() {
        let reference: HandlerReference = "app.handlers.v2.entry".parse().unwrap();
        assert_eq!(reference.to_string(), "app.handlers.v2.entry");
    }

    #[test]
    fn test_reference_without_separator() {
        let error = "handler".parse::<HandlerReference>().unwrap_err();
        assert!(matches!(
            error,
            HarnessError::InvalidHandlerReference { ref reference, .. } if reference == "handler"
        ));
    }

    #[test]
    fn test_reference_with_empty_part() {
        assert!("module.".parse::<HandlerReference>().is_err());
        assert!(".symbol".parse::<HandlerReference>().is_err());
    }

    #[test]
    fn test_read_event_preserves_document() {
        let document = json!({
            "key1": "value1",
            "nested": {"list": [1, 2.5, null, true], "empty": {}},
            "unicode": "✌️"
        });
        let bytes = serde_json::to_vec(&document).unwrap();

        let event = read_event(Trickle(&bytes)).unwrap();
        assert_eq!(event, document);
    }

    #[test]
    fn test_read_event_accepts_scalars() {
        assert_eq!(read_event("42".as_bytes()).unwrap(), json!(42));
        assert_eq!(read_event("\"hi\"".as_bytes()).unwrap(), json!("hi"));
    }

    #[test]
    fn test_read_event_malformed() {
        let error = read_event("{not json".as_bytes()).unwrap_err();
        assert!(matches!(error, HarnessError::MalformedPayload(_)));
        assert!(error.to_string().starts_with("Invalid input JSON: "));
    }

    #[test]
    fn test_read_event_empty_stream() {
        let error = read_event(io::empty()).unwrap_err();
        assert!(matches!(error, HarnessError::MalformedPayload(_)));
    }

    #[test]
    fn test_load_checks_payload_before_reference() {
        let error = load("{not json".as_bytes(), "noseparator", Default::default()).unwrap_err();
        assert!(matches!(error, HarnessError::MalformedPayload(_)));
    }

    #[test]
    fn test_load_keeps_missing_params() {
        let request = load("{}".as_bytes(), "samples.echo", InvocationParams::default()).unwrap();
        assert_eq!(request.handler, HandlerReference::new("samples", "echo"));
        assert_eq!(request.params.function_name, None);
        assert_eq!(request.params.timeout_seconds, None);
    }
}
