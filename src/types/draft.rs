use crate::wire::{tags, Prop, PropValue};

/// In-progress content for a message object: subject, body and recipients,
/// held client-side until the message is saved.
///
/// The client does not synthesize content: the caller builds the draft and
/// hands it to [`Client::set_properties`](crate::client::Client::set_properties).
/// Once the message is saved the committed draft is immutable.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MessageDraft {
    pub subject: Option<String>,
    pub body: Option<String>,
    pub recipients: Vec<String>,
}

impl MessageDraft {
    pub fn new() -> MessageDraft {
        MessageDraft::default()
    }

    pub(crate) fn props(&self) -> Vec<Prop> {
        let mut props = Vec::new();
        if let Some(subject) = &self.subject {
            props.push(Prop::new(tags::SUBJECT, PropValue::String(subject.clone())));
        }
        if let Some(body) = &self.body {
            props.push(Prop::new(tags::BODY, PropValue::String(body.clone())));
        }
        if !self.recipients.is_empty() {
            props.push(Prop::new(
                tags::DISPLAY_TO,
                PropValue::StringArray(self.recipients.clone()),
            ));
        }
        props
    }
}
