use crate::{Effect, HarvestState, Msg, Phase};

/// Pure update function: applies a message to the pipeline state and
/// returns the next effect to execute.
///
/// The pipeline is strictly sequential, so each step yields at most one
/// effect and the runner answers it with exactly one message. Terminal
/// states ignore further messages and yield `None`.
pub fn update(mut state: HarvestState, msg: Msg) -> (HarvestState, Option<Effect>) {
    if state.phase().is_terminal() {
        return (state, None);
    }

    let effect = match msg {
        Msg::Restored(restored) => {
            if state.phase() != Phase::Init {
                return (state, None);
            }
            state.restore(restored);
            state.next_step()
        }
        Msg::PageListed(page) => {
            if state.phase() != Phase::Listing {
                return (state, None);
            }
            state.filter_page(page);
            state.next_step()
        }
        Msg::ListingFailed { reason } => state.abort(format!("listing failed: {reason}")),
        Msg::ShardDelivered { name } => {
            if state.mark_delivered(name) {
                state.next_step()
            } else {
                state.abort(format!("unexpected delivery confirmation for {name}"))
            }
        }
        Msg::ShipFailed { name, reason } => {
            state.abort(format!("shipping {name} failed: {reason}"))
        }
        Msg::CheckpointPersisted => state.next_step(),
        Msg::PersistFailed { reason } => state.abort(format!("persisting state failed: {reason}")),
        Msg::Interrupted => {
            state.interrupt();
            state.next_step()
        }
    };

    (state, Some(effect))
}
