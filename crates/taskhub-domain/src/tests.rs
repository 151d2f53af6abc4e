#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use crate::history::HistoryEvent;
    use crate::runtime_state::{OrchestrationRuntimeState, OrchestrationStateFilter};
    use crate::types::*;

    fn started(instance: &OrchestrationInstance) -> HistoryEvent {
        HistoryEvent::ExecutionStarted {
            event_id: -1,
            timestamp: Utc::now(),
            name: "hello".into(),
            version: "1.0".into(),
            input: Some(json!({"who": "world"})),
            instance: instance.clone(),
        }
    }

    fn instance() -> OrchestrationInstance {
        OrchestrationInstance::new(InstanceId::new("i1"), ExecutionId::new("e1"))
    }

    #[test]
    fn empty_state_is_pending() {
        let state = OrchestrationRuntimeState::default();
        assert_eq!(state.status(), OrchestrationStatus::Pending);
        assert!(!state.has_started());
    }

    #[test]
    fn execution_started_makes_state_running() {
        let mut state = OrchestrationRuntimeState::default();
        state.add_event(started(&instance()));
        assert_eq!(state.status(), OrchestrationStatus::Running);
        assert_eq!(state.name(), Some("hello"));
        assert_eq!(state.instance().unwrap().instance_id.as_str(), "i1");
    }

    #[test]
    fn terminal_events_set_terminal_status() {
        for (event, expected) in [
            (
                HistoryEvent::ExecutionCompleted {
                    event_id: -1,
                    timestamp: Utc::now(),
                    result: Some(json!("done")),
                },
                OrchestrationStatus::Completed,
            ),
            (
                HistoryEvent::ExecutionFailed {
                    event_id: -1,
                    timestamp: Utc::now(),
                    reason: "boom".into(),
                    details: None,
                },
                OrchestrationStatus::Failed,
            ),
            (
                HistoryEvent::ExecutionTerminated {
                    event_id: -1,
                    timestamp: Utc::now(),
                    reason: "manual".into(),
                },
                OrchestrationStatus::Terminated,
            ),
            (
                HistoryEvent::ContinuedAsNew {
                    event_id: -1,
                    timestamp: Utc::now(),
                    input: None,
                },
                OrchestrationStatus::ContinuedAsNew,
            ),
        ] {
            let mut state = OrchestrationRuntimeState::default();
            state.add_event(started(&instance()));
            state.add_event(event);
            assert_eq!(state.status(), expected);
            assert!(state.status().is_terminal());
        }
    }

    #[test]
    fn replay_from_history_matches_incremental_build() {
        let mut incremental = OrchestrationRuntimeState::default();
        incremental.add_event(started(&instance()));
        incremental.add_event(HistoryEvent::TaskScheduled {
            event_id: 0,
            timestamp: Utc::now(),
            name: "send_email".into(),
            input: None,
        });
        incremental.add_event(HistoryEvent::TaskCompleted {
            event_id: -1,
            timestamp: Utc::now(),
            task_scheduled_id: 0,
            result: Some(json!("sent")),
        });

        let replayed = OrchestrationRuntimeState::from_history(incremental.full_history());
        assert_eq!(replayed.status(), incremental.status());
        assert_eq!(replayed.name(), incremental.name());
        assert_eq!(replayed.next_event_id(), incremental.next_event_id());
        assert!(replayed.new_events().is_empty());
    }

    #[test]
    fn duplicate_task_completion_is_detected() {
        let mut state = OrchestrationRuntimeState::default();
        state.add_event(started(&instance()));
        state.add_event(HistoryEvent::TaskScheduled {
            event_id: 0,
            timestamp: Utc::now(),
            name: "t".into(),
            input: None,
        });

        let completion = HistoryEvent::TaskCompleted {
            event_id: -1,
            timestamp: Utc::now(),
            task_scheduled_id: 0,
            result: None,
        };
        assert!(!state.is_duplicate(&completion));
        state.add_event(completion.clone());
        assert!(state.is_duplicate(&completion));

        // A completion for an id that was never scheduled is also a duplicate.
        let stray = HistoryEvent::TaskCompleted {
            event_id: -1,
            timestamp: Utc::now(),
            task_scheduled_id: 42,
            result: None,
        };
        assert!(state.is_duplicate(&stray));
    }

    #[test]
    fn duplicate_timer_fired_is_detected() {
        let mut state = OrchestrationRuntimeState::default();
        state.add_event(started(&instance()));
        let fire_at = Utc::now();
        state.add_event(HistoryEvent::TimerCreated {
            event_id: 3,
            timestamp: Utc::now(),
            fire_at,
        });

        let fired = HistoryEvent::TimerFired {
            event_id: -1,
            timestamp: Utc::now(),
            timer_id: 3,
            fire_at,
        };
        assert!(!state.is_duplicate(&fired));
        state.add_event(fired.clone());
        assert!(state.is_duplicate(&fired));
    }

    #[test]
    fn duplicate_execution_started_is_detected() {
        let mut state = OrchestrationRuntimeState::default();
        let event = started(&instance());
        assert!(!state.is_duplicate(&event));
        state.add_event(event.clone());
        assert!(state.is_duplicate(&event));
    }

    #[test]
    fn next_event_id_advances_past_max() {
        let mut state = OrchestrationRuntimeState::default();
        state.add_event(started(&instance()));
        assert_eq!(state.next_event_id(), 0);
        state.add_event(HistoryEvent::TaskScheduled {
            event_id: 7,
            timestamp: Utc::now(),
            name: "t".into(),
            input: None,
        });
        assert_eq!(state.next_event_id(), 8);
    }

    #[test]
    fn history_event_serde_round_trips() {
        let event = started(&instance());
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"kind\":\"ExecutionStarted\""));
        let back: HistoryEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn filter_matches_on_status_and_window() {
        let mut state = OrchestrationRuntimeState::default();
        state.add_event(started(&instance()));
        let row = crate::runtime_state::OrchestrationState {
            instance: instance(),
            name: "hello".into(),
            version: "1.0".into(),
            status: OrchestrationStatus::Running,
            created_time: Utc::now(),
            last_updated_time: Utc::now(),
            completed_time: None,
            input: None,
            output: None,
            failure_reason: None,
        };

        let all = OrchestrationStateFilter::default();
        assert!(all.matches(&row));

        let completed_only = OrchestrationStateFilter {
            statuses: Some(vec![OrchestrationStatus::Completed]),
            ..Default::default()
        };
        assert!(!completed_only.matches(&row));

        let future_only = OrchestrationStateFilter {
            created_from: Some(Utc::now() + chrono::Duration::hours(1)),
            ..Default::default()
        };
        assert!(!future_only.matches(&row));
    }

    #[test]
    fn task_hub_info_enforces_partition_bounds() {
        assert!(TaskHubInfo::new("hub", 0).is_err());
        assert!(TaskHubInfo::new("hub", 17).is_err());
        assert!(TaskHubInfo::new("", 4).is_err());
        let info = TaskHubInfo::new("hub", 16).unwrap();
        assert_eq!(info.partition_count, 16);
    }
}
