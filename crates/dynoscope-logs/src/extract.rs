//! Extraction of typed lifecycle events from platform log lines.
//!
//! The platform emits a fixed set of system messages; everything else is
//! application output and is ignored. One complete line yields at most one
//! event. Matchers run in a fixed priority order because some lines can
//! textually satisfy more than one pattern; the first match wins:
//!
//! 1. line prefix `source[proc]:` (optionally preceded by a timestamp) —
//!    always attempted first, provides the dyno name/type context
//! 2. `State changed from X to Y`
//! 3. `Update CONFIG_VAR ... by ...`
//! 4. `Detach CONFIG_VAR ...`
//! 5. `Attach CONFIG_VAR ...`
//! 6. `... completed provisioning`
//! 7. `Scaled to type@N:Size`
//! 8. ``Starting process with command `...` ``

use once_cell::sync::Lazy;
use regex::Regex;

use dynoscope_types::{DynoState, LogEvent};

static PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\d{4}-\d{2}-\d{2}T\S+ )?(?P<source>[A-Za-z][\w-]*)\[(?P<proc>[^\]]+)\]:\s?(?P<msg>.*)$")
        .expect("prefix pattern")
});

static STATE_CHANGED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"State changed from (?P<from>\w+) to (?P<to>\w+)").expect("state pattern"));

static ATTACHMENT_UPDATED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Update (?P<name>[A-Z][A-Z0-9_]*)(?: \(@ref:(?P<ref>[^)]+)\))? by")
        .expect("update pattern")
});

static ATTACHMENT_DETACHED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Detach (?P<name>[A-Z][A-Z0-9_]*)(?: \(@ref:(?P<ref>[^)]+)\))?")
        .expect("detach pattern")
});

static ATTACHMENT_ATTACHED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Attach (?P<name>[A-Z][A-Z0-9_]*)(?: \(@ref:(?P<ref>[^)]+)\))?")
        .expect("attach pattern")
});

static PROVISIONING_COMPLETED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?P<ref>[\w.-]+) completed provisioning").expect("provision pattern"));

static SCALED_TO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Scaled to (?P<dtype>\w+)@(?P<qty>\d+):(?P<size>[\w-]+)").expect("scale pattern")
});

static STARTING_PROCESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Starting process with command `(?P<cmd>[^`]+)`").expect("start pattern")
});

/// Pattern matching over complete log lines
pub struct EventExtractor;

impl EventExtractor {
    /// Extract at most one typed event from a complete log line.
    ///
    /// Lines without the platform prefix, and prefixed lines matching no
    /// system message, produce no event; that is routine, not an error.
    pub fn extract(line: &str) -> Option<LogEvent> {
        let prefix = PREFIX.captures(line)?;
        let proc = prefix.name("proc")?.as_str();
        let msg = prefix.name("msg")?.as_str();

        if let Some(caps) = STATE_CHANGED.captures(msg) {
            return Some(LogEvent::StateChanged {
                dyno_name: proc.to_string(),
                from: DynoState::from(&caps["from"]),
                to: DynoState::from(&caps["to"]),
            });
        }

        if let Some(caps) = ATTACHMENT_UPDATED.captures(msg) {
            return Some(LogEvent::AttachmentUpdated {
                config_var: caps["name"].to_string(),
                reference: caps.name("ref").map(|m| m.as_str().to_string()),
            });
        }

        if let Some(caps) = ATTACHMENT_DETACHED.captures(msg) {
            return Some(LogEvent::AttachmentDetached {
                config_var: caps["name"].to_string(),
                reference: caps.name("ref").map(|m| m.as_str().to_string()),
            });
        }

        if let Some(caps) = ATTACHMENT_ATTACHED.captures(msg) {
            return Some(LogEvent::AttachmentAttached {
                config_var: caps["name"].to_string(),
                reference: caps.name("ref").map(|m| m.as_str().to_string()),
            });
        }

        if let Some(caps) = PROVISIONING_COMPLETED.captures(msg) {
            return Some(LogEvent::ProvisioningCompleted {
                reference: caps["ref"].to_string(),
            });
        }

        if let Some(caps) = SCALED_TO.captures(msg) {
            // A quantity that fails integer parsing is a no-match for this
            // pattern only; later matchers still run.
            if let Ok(quantity) = caps["qty"].parse::<i64>() {
                return Some(LogEvent::ScaledTo {
                    dyno_type: caps["dtype"].to_string(),
                    quantity,
                    size: caps["size"].to_string(),
                });
            }
        }

        if let Some(caps) = STARTING_PROCESS.captures(msg) {
            return Some(LogEvent::StartingProcess {
                dyno_name: proc.to_string(),
                command: caps["cmd"].to_string(),
            });
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::LineAssembler;

    #[test]
    fn state_change_with_dyno_context() {
        let event = EventExtractor::extract("app[web.1]: State changed from starting to up");
        assert_eq!(
            event,
            Some(LogEvent::StateChanged {
                dyno_name: "web.1".into(),
                from: DynoState::Starting,
                to: DynoState::Up,
            })
        );
    }

    #[test]
    fn timestamp_prefix_is_tolerated() {
        let event = EventExtractor::extract(
            "2024-06-01T10:30:00.000000+00:00 heroku[web.2]: State changed from up to crashed",
        );
        assert_eq!(
            event,
            Some(LogEvent::StateChanged {
                dyno_name: "web.2".into(),
                from: DynoState::Up,
                to: DynoState::Crashed,
            })
        );
    }

    #[test]
    fn scale_quantity_is_an_integer() {
        let event = EventExtractor::extract("app[api]: Scaled to web@2:Standard-1X");
        assert_eq!(
            event,
            Some(LogEvent::ScaledTo {
                dyno_type: "web".into(),
                quantity: 2,
                size: "Standard-1X".into(),
            })
        );
    }

    #[test]
    fn overflowing_quantity_falls_through_to_later_matchers() {
        // The scale pattern matches textually but the quantity does not
        // parse; the starting-process matcher still gets its turn.
        let line = "app[web.1]: Scaled to web@99999999999999999999:X then Starting process with command `npm start`";
        let event = EventExtractor::extract(line);
        assert_eq!(
            event,
            Some(LogEvent::StartingProcess {
                dyno_name: "web.1".into(),
                command: "npm start".into(),
            })
        );
    }

    #[test]
    fn starting_process_captures_command() {
        let event =
            EventExtractor::extract("heroku[worker.3]: Starting process with command `bundle exec sidekiq`");
        assert_eq!(
            event,
            Some(LogEvent::StartingProcess {
                dyno_name: "worker.3".into(),
                command: "bundle exec sidekiq".into(),
            })
        );
    }

    #[test]
    fn attachment_update_wins_over_detach() {
        // Satisfies both the update and detach patterns; update is earlier
        // in priority order and must win.
        let line = "heroku[api]: Update DATABASE by admin@example.com will Detach REDIS";
        let event = EventExtractor::extract(line);
        assert_eq!(
            event,
            Some(LogEvent::AttachmentUpdated {
                config_var: "DATABASE".into(),
                reference: None,
            })
        );
    }

    #[test]
    fn attach_with_reference() {
        let event =
            EventExtractor::extract("heroku[api]: Attach DATABASE (@ref:postgresql-solid-12345)");
        assert_eq!(
            event,
            Some(LogEvent::AttachmentAttached {
                config_var: "DATABASE".into(),
                reference: Some("postgresql-solid-12345".into()),
            })
        );
    }

    #[test]
    fn detach_without_reference() {
        let event = EventExtractor::extract("heroku[api]: Detach REDIS");
        assert_eq!(
            event,
            Some(LogEvent::AttachmentDetached {
                config_var: "REDIS".into(),
                reference: None,
            })
        );
    }

    #[test]
    fn provisioning_completed() {
        let event = EventExtractor::extract("app[api]: postgresql-solid-12345 completed provisioning");
        assert_eq!(
            event,
            Some(LogEvent::ProvisioningCompleted {
                reference: "postgresql-solid-12345".into(),
            })
        );
    }

    #[test]
    fn application_output_is_discarded() {
        assert_eq!(EventExtractor::extract("app[web.1]: GET /health 200 3ms"), None);
        assert_eq!(EventExtractor::extract("not a platform line at all"), None);
    }

    #[test]
    fn split_chunks_yield_the_same_event_as_one_chunk() {
        let mut assembler = LineAssembler::new();
        let mut events = Vec::new();
        for chunk in [b"app[web.1]: State changed ".as_slice(), b"from starting to up\n"] {
            for line in assembler.feed(chunk) {
                events.extend(EventExtractor::extract(&line));
            }
        }
        assert_eq!(
            events,
            vec![LogEvent::StateChanged {
                dyno_name: "web.1".into(),
                from: DynoState::Starting,
                to: DynoState::Up,
            }]
        );

        let whole: Vec<_> = EventExtractor::extract("app[web.1]: State changed from starting to up")
            .into_iter()
            .collect();
        assert_eq!(events, whole);
    }
}
