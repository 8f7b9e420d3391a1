use state_machines::state_machine;

state_machine! {
    name: AnswerFlowMachine,
    state: AnswerFlowState,
    initial: Retrieving,
    states: [Retrieving, ContextAssembled, Streaming, Committed, Errored],
    events {
        assemble { transition: { from: Retrieving, to: ContextAssembled } }
        begin_streaming { transition: { from: ContextAssembled, to: Streaming } }
        commit { transition: { from: Streaming, to: Committed } }
        fail {
            transition: { from: Retrieving, to: Errored }
            transition: { from: ContextAssembled, to: Errored }
            transition: { from: Streaming, to: Errored }
        }
    }
}

pub fn begin() -> AnswerFlowMachine<(), Retrieving> {
    AnswerFlowMachine::new(())
}
