//! MessagePack bodies carried inside [`Envelope`]s.
//!
//! Bodies are always encoded with named fields (`rmp_serde::to_vec_named`) so
//! that clients in any language see plain maps.

use crate::proto::Envelope;
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sluice::{Error, Frame, Parameters, Request, Result};

/// Encodes `value` as a MessagePack map.
pub fn pack<T: Serialize + ?Sized>(value: &T) -> Result<Envelope> {
    rmp_serde::to_vec_named(value)
        .map(|payload| Envelope {
            payload: Bytes::from(payload),
        })
        .map_err(|e| Error::Encoding {
            format: "envelope".to_owned(),
            reason: e.to_string(),
        })
}

/// Decodes an envelope body.
///
/// # Errors
///
/// [`Error::MalformedRequest`] if the payload is not valid MessagePack for `T`.
pub fn unpack<T: DeserializeOwned>(envelope: &Envelope) -> Result<T> {
    rmp_serde::from_slice(&envelope.payload).map_err(|e| Error::MalformedRequest {
        reason: e.to_string(),
    })
}

/// Decodes a `Source` request, separating unknown actions from malformed
/// payloads.
pub fn unpack_request(envelope: &Envelope) -> Result<Request> {
    #[derive(serde::Deserialize)]
    struct Tag {
        action: Option<String>,
    }

    let Tag { action } = unpack(envelope)?;
    let action = action.ok_or_else(|| Error::MalformedRequest {
        reason: "missing `action`".to_owned(),
    })?;
    if !Request::ACTIONS.contains(&action.as_str()) {
        return Err(Error::UnknownAction { action });
    }
    unpack(envelope)
}

pub fn open_request(name: impl Into<String>, parameters: Parameters) -> Result<Envelope> {
    pack(&Request::Open {
        name: name.into(),
        parameters,
    })
}

pub fn read_request<I, S>(source_id: impl Into<String>, accepted_formats: I) -> Result<Envelope>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    pack(&Request::Read {
        source_id: source_id.into(),
        accepted_formats: accepted_formats.into_iter().map(Into::into).collect(),
    })
}

pub fn close_request(source_id: impl Into<String>) -> Result<Envelope> {
    pack(&Request::Close {
        source_id: source_id.into(),
    })
}

/// Decodes one frame of a read response.
pub fn unpack_frame(envelope: &Envelope) -> Result<Frame> {
    unpack(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice::ContainerKind;

    #[test]
    fn decodes_read_requests() {
        let envelope = read_request("01ARZ3NDEKTSV4RRFFQ69G5FAV", ["msgpack", "raw"]).unwrap();
        assert_eq!(
            unpack_request(&envelope).unwrap(),
            Request::Read {
                source_id: "01ARZ3NDEKTSV4RRFFQ69G5FAV".into(),
                accepted_formats: vec!["msgpack".into(), "raw".into()],
            }
        );
    }

    #[test]
    fn open_parameters_survive_the_envelope() {
        let mut params = Parameters::new();
        params.insert("stop".into(), 10.into());
        let envelope = open_request("numbers", params.clone()).unwrap();
        let Request::Open { name, parameters } = unpack_request(&envelope).unwrap() else {
            panic!("expected an open request");
        };
        assert_eq!(name, "numbers");
        assert_eq!(parameters, params);
    }

    #[test]
    fn unknown_actions_are_reported_by_name() {
        let envelope = pack(&serde_json::json!({"action": "seek", "offset": 4})).unwrap();
        assert_eq!(
            unpack_request(&envelope).unwrap_err(),
            Error::UnknownAction {
                action: "seek".into()
            }
        );
    }

    #[test]
    fn garbage_is_malformed() {
        let envelope = Envelope {
            payload: Bytes::from_static(&[0xc1, 0x00]),
        };
        assert!(matches!(
            unpack_request(&envelope),
            Err(Error::MalformedRequest { .. })
        ));

        let untagged = pack(&serde_json::json!({"name": "numbers"})).unwrap();
        assert!(matches!(
            unpack_request(&untagged),
            Err(Error::MalformedRequest { .. })
        ));
    }

    #[test]
    fn frames_carry_binary_data() {
        let frame = Frame {
            format: "raw".into(),
            container: ContainerKind::NdArray,
            data: Bytes::from_static(&[1, 2, 3]),
        };
        let envelope = pack(&frame).unwrap();
        // 0xc4 is the MessagePack bin8 marker.
        assert!(envelope.payload.windows(2).any(|w| w == [0xc4, 3]));
        assert_eq!(unpack_frame(&envelope).unwrap(), frame);
    }
}
