use smelter_core::RawEvent;
use sqlx::PgConnection;

use crate::error::TransformError;
use crate::transformers;

/// Every event tag the transform stage knows how to handle. Closed by
/// construction: an unknown tag is a detectable failure, never a silent
/// no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Commit,
    PullRequest,
    Issue,
    DocChange,
}

impl EventKind {
    pub fn from_tag(tag: &str) -> Option<EventKind> {
        match tag {
            "commit" => Some(EventKind::Commit),
            "pull_request" => Some(EventKind::PullRequest),
            "issue" => Some(EventKind::Issue),
            "doc_change" => Some(EventKind::DocChange),
            _ => None,
        }
    }
}

/// Route one claimed event to its transformer, inside the caller's
/// transaction. All entity writes either land with `mark_processed` or roll
/// back together.
pub async fn dispatch(conn: &mut PgConnection, event: &RawEvent) -> Result<(), TransformError> {
    let Some(kind) = EventKind::from_tag(&event.event_type) else {
        return Err(TransformError::UnrecognizedEventType(
            event.event_type.clone(),
        ));
    };

    match kind {
        EventKind::Commit => transformers::commit::apply(conn, event).await,
        EventKind::PullRequest => transformers::pull_request::apply(conn, event).await,
        EventKind::Issue => transformers::issue::apply(conn, event).await,
        EventKind::DocChange => transformers::doc_change::apply(conn, event).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smelter_core::EventStream;

    #[test]
    fn test_every_stream_tag_has_a_kind() {
        for stream in EventStream::ALL {
            assert!(
                EventKind::from_tag(stream.event_tag()).is_some(),
                "no transformer registered for {}",
                stream.event_tag()
            );
        }
    }

    #[test]
    fn test_unknown_tags_have_no_kind() {
        assert!(EventKind::from_tag("release").is_none());
        assert!(EventKind::from_tag("").is_none());
    }
}
