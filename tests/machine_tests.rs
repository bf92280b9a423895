/// State machine integration tests: end-to-end walks over parsed templates.

use dialogue_engine::core::condition::{ConditionError, PredicateTable};
use dialogue_engine::core::machine::{
    ChoiceRef, DialogueStateMachine, InvalidChoice, MachineError, MachineRole,
    DEFAULT_LOCKED_MESSAGE,
};
use dialogue_engine::schema::choice::PredicateId;
use dialogue_engine::schema::state::Outcome;
use dialogue_engine::schema::template::DialogueTemplate;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;
use std::sync::Arc;

fn parse(json: &str) -> Arc<DialogueTemplate> {
    Arc::new(DialogueTemplate::parse_json(json).unwrap())
}

fn never(_: &PredicateId, _: &()) -> Result<bool, ConditionError> {
    Ok(false)
}

#[test]
fn greet_then_bye() {
    let template = parse(
        r#"{
            "start": "greet",
            "states": {
                "greet": { "choices": [{ "text": "Hi", "next": "bye" }] },
                "bye": { "type": "END_DIALOGUE" }
            }
        }"#,
    );
    let mut machine = DialogueStateMachine::new("greeting", template, None).unwrap();

    let view = machine.available_choices();
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].choice, ChoiceRef::Real(0));
    assert_eq!(view[0].text, "Hi");
    assert!(!view[0].is_locked());
    assert_eq!(machine.current_text(), "");

    let outcome = machine.choose(ChoiceRef::Real(0), &mut ()).unwrap();
    assert_eq!(outcome, Outcome::EndDialogue);
    assert_eq!(machine.current_state_key(), "bye");
    assert!(machine.available_choices().is_empty());
}

#[test]
fn grayed_out_choice_uses_default_message() {
    let template = parse(
        r#"{
            "start": "door",
            "states": {
                "door": {
                    "choices": [
                        {
                            "text": "Unlock",
                            "next": "inside",
                            "only_if": {
                                "predicate": "has_key",
                                "when_unavailable": { "display": "grayed_out" }
                            }
                        },
                        { "text": "Leave", "next": "outside" }
                    ]
                },
                "inside": { "type": "end_dialogue" },
                "outside": { "type": "end_dialogue" }
            }
        }"#,
    );
    let mut machine = DialogueStateMachine::new("door", template, None).unwrap();
    machine.evaluate(&never, &()).unwrap();

    let view = machine.available_choices();
    assert_eq!(view.len(), 2);
    assert_eq!(view[0].text, "Unlock");
    assert_eq!(view[0].locked_message.as_deref(), Some(DEFAULT_LOCKED_MESSAGE));
    assert!(!machine.is_available(0));

    let err = machine.choose(ChoiceRef::Real(0), &mut ()).unwrap_err();
    assert!(matches!(
        err,
        MachineError::InvalidChoice {
            reason: InvalidChoice::Unavailable { index: 0, .. },
            ..
        }
    ));
    assert_eq!(machine.current_state_key(), "door");
}

#[test]
fn looping_back_rerolls_text() {
    let template = parse(
        r#"{
            "start": "tavern",
            "states": {
                "tavern": {
                    "text": ["Another round?", "You look thirsty.", "What'll it be?", "Ale or mead?"],
                    "choices": [
                        { "text": "One more", "next": "tavern" },
                        { "text": "I'm done", "next": "end" }
                    ]
                },
                "end": { "type": "end_dialogue" }
            }
        }"#,
    );
    let mut machine = DialogueStateMachine::with_rng(
        "tavern",
        template,
        None,
        MachineRole::Authoritative,
        StdRng::seed_from_u64(3),
    )
    .unwrap();

    let mut seen = HashSet::new();
    for _ in 0..32 {
        let text = machine.current_text().to_string();
        assert_eq!(machine.current_text(), text);
        seen.insert(text);
        assert_eq!(
            machine.choose(ChoiceRef::Real(0), &mut ()).unwrap(),
            Outcome::Default
        );
    }
    assert!(seen.len() > 1, "self-loops should re-roll the text");
}

#[test]
fn self_loops_keep_availability() {
    let template = parse(
        r#"{
            "start": "loop",
            "states": {
                "loop": {
                    "choices": [
                        { "text": "Again", "next": "loop" },
                        {
                            "text": "Secret",
                            "next": "end",
                            "only_if": {
                                "predicate": "lucky",
                                "when_unavailable": { "display": "hidden" }
                            }
                        }
                    ]
                },
                "end": { "type": "end_dialogue" }
            }
        }"#,
    );
    let mut machine = DialogueStateMachine::new("loop", template, None).unwrap();
    machine.evaluate(&never, &()).unwrap();
    assert_eq!(machine.available_choices().len(), 1);

    machine.choose(ChoiceRef::Real(0), &mut ()).unwrap();
    assert!(!machine.is_available(1));
    assert_eq!(machine.available_choices().len(), 1);
}

#[test]
fn snapshot_round_trip_and_idempotence() {
    let template = parse(
        r#"{
            "start": "gate",
            "states": {
                "gate": {
                    "choices": [
                        { "next": "end", "only_if": { "predicate": "a", "when_unavailable": { "display": "hidden" } } },
                        { "next": "end", "only_if": { "predicate": "b", "when_unavailable": { "display": "grayed_out", "message": "Not yet." } } },
                        { "next": "end" }
                    ]
                },
                "yard": {
                    "choices": [
                        { "next": "gate", "only_if": { "predicate": "c", "when_unavailable": { "display": "hidden" } } }
                    ]
                },
                "end": { "type": "END_DIALOGUE" }
            }
        }"#,
    );
    let predicates = PredicateTable::new()
        .with("a", |n: &u32| *n > 0)
        .with("b", |n: &u32| *n > 1)
        .with("c", |n: &u32| *n > 2);

    let mut authority = DialogueStateMachine::new("gate", Arc::clone(&template), None).unwrap();
    let delta = authority.evaluate(&predicates, &1).unwrap();
    assert_eq!(delta.len(), 2);

    let mut mirror = DialogueStateMachine::mirror("gate", template, None).unwrap();
    let snapshot = authority.full_snapshot();
    mirror.apply_delta(&snapshot).unwrap();
    assert_eq!(mirror.full_snapshot(), snapshot);
    assert_eq!(mirror.available_choices(), authority.available_choices());

    let next = authority.evaluate(&predicates, &3).unwrap();
    mirror.apply_delta(&next).unwrap();
    let once = mirror.full_snapshot();
    mirror.apply_delta(&next).unwrap();
    assert_eq!(mirror.full_snapshot(), once);
    assert_eq!(once, authority.full_snapshot());
}

#[test]
fn missing_destination_fails_without_moving() {
    let template = parse(
        r#"{
            "start": "a",
            "states": { "a": { "choices": [{ "text": "Go", "next": "nowhere" }] } }
        }"#,
    );
    let mut machine = DialogueStateMachine::new("broken", template, None).unwrap();
    let err = machine.choose(ChoiceRef::Real(0), &mut ()).unwrap_err();
    assert!(matches!(err, MachineError::UnknownState(_)));
    assert_eq!(machine.current_state_key(), "a");
}
