// Human-in-the-loop decisions: requests, presenters and the per-window
// coordinator that brokers them.

mod coordinator;
mod presenter;
mod request;

pub use coordinator::{DecisionCoordinator, DecisionTicket, TenantState};
pub use presenter::{DecisionPresenter, OwnerKey, TenantRegistration};
pub use request::{
    DecisionKind, DecisionRequest, DecisionResponse, Question, QuestionOption, REJECT_TIMEOUT,
    REJECT_TORN_DOWN,
};
