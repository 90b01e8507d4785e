//! The `<Message>` envelope and its `<Event>` children.

use crate::error::DecodeError;

/// Opening tag of every envelope.
pub const OPEN_TAG: &str = "<Message>";
/// Closing tag of every envelope; the framer keys on it.
pub const CLOSE_TAG: &str = "</Message>";

pub const SUBSCRIBE: &str = "Subscribe";
pub const UNSUBSCRIBE: &str = "Unsubscribe";
pub const SET_UPDATE_INTERVAL: &str = "SetUpdateInterval";
pub const ESTABLISH_CONNECTION: &str = "EstablishConnection";
pub const SET_VEHICLE_CONTROL: &str = "SetVehicleControl";
pub const SUBSCRIBED_VALUES: &str = "SubscribedValues";

/// One `<Event Name="...">payload</Event>` child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub name: String,
    pub payload: String,
}

impl Event {
    pub fn new(name: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
        }
    }
}

/// Incrementally builds one envelope.
#[derive(Debug, Default)]
pub struct EnvelopeBuilder {
    out: String,
}

impl EnvelopeBuilder {
    pub fn new() -> Self {
        let mut out = String::with_capacity(256);
        out.push_str(OPEN_TAG);
        Self { out }
    }

    /// Append an event with a text payload (escaped).
    pub fn event(mut self, name: &str, payload: &str) -> Self {
        self.open_event(name);
        escape_into(payload, &mut self.out);
        self.out.push_str("</Event>");
        self
    }

    /// Append an event whose payload is pre-built XML markup.
    pub(crate) fn event_markup(mut self, name: &str, markup: &str) -> Self {
        self.open_event(name);
        self.out.push_str(markup);
        self.out.push_str("</Event>");
        self
    }

    fn open_event(&mut self, name: &str) {
        self.out.push_str("<Event Name=\"");
        escape_into(name, &mut self.out);
        self.out.push_str("\">");
    }

    pub fn finish(mut self) -> String {
        self.out.push_str(CLOSE_TAG);
        self.out
    }
}

/// Encode a list of events as one envelope.
pub fn encode_envelope(events: &[Event]) -> String {
    events
        .iter()
        .fold(EnvelopeBuilder::new(), |b, e| b.event(&e.name, &e.payload))
        .finish()
}

/// Parse an envelope into its events, in document order.
///
/// Each payload is the event's concatenated text; nested markup (as in
/// `SubscribedValues`) is flattened. Use
/// [`MessageCodec::decode_telemetry`](crate::MessageCodec::decode_telemetry)
/// for telemetry.
pub fn parse_envelope(raw: &str) -> Result<Vec<Event>, DecodeError> {
    let doc = roxmltree::Document::parse(raw)?;
    let root = doc.root_element();
    if !root.has_tag_name("Message") {
        return Err(DecodeError::UnexpectedRoot(
            root.tag_name().name().to_string(),
        ));
    }

    Ok(root
        .children()
        .filter(|n| n.is_element() && n.has_tag_name("Event"))
        .map(|n| {
            let payload: String = n
                .descendants()
                .filter(|d| d.is_text())
                .filter_map(|d| d.text())
                .collect();
            Event::new(n.attribute("Name").unwrap_or_default(), payload)
        })
        .collect())
}

pub(crate) fn escape_into(text: &str, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_keeps_explicit_close() {
        let msg = EnvelopeBuilder::new().event(ESTABLISH_CONNECTION, "").finish();
        assert_eq!(
            msg,
            "<Message><Event Name=\"EstablishConnection\"></Event></Message>"
        );
    }

    #[test]
    fn parse_preserves_order() {
        let msg = encode_envelope(&[
            Event::new(UNSUBSCRIBE, "EgoVehicle"),
            Event::new(SUBSCRIBE, "EgoVehicle/x"),
            Event::new(SET_UPDATE_INTERVAL, "100"),
        ]);
        let events = parse_envelope(&msg).unwrap();
        let names: Vec<&str> = events.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, [UNSUBSCRIBE, SUBSCRIBE, SET_UPDATE_INTERVAL]);
        assert_eq!(events[1].payload, "EgoVehicle/x");
    }

    #[test]
    fn payload_is_escaped() {
        let msg = encode_envelope(&[Event::new(SET_VEHICLE_CONTROL, "a<b&c")]);
        assert!(msg.contains("a&lt;b&amp;c"));
        let events = parse_envelope(&msg).unwrap();
        assert_eq!(events[0].payload, "a<b&c");
    }

    #[test]
    fn rejects_foreign_root() {
        let err = parse_envelope("<Envelope><Event Name=\"x\"/></Envelope>").unwrap_err();
        assert!(matches!(err, DecodeError::UnexpectedRoot(name) if name == "Envelope"));
    }

    #[test]
    fn rejects_malformed_xml() {
        let err = parse_envelope("<Message><Event Name=\"x\">").unwrap_err();
        assert!(matches!(err, DecodeError::Xml(_)));
    }
}
