//! Step events for workflow observers.
//!
//! The engine publishes one [`StepEvent`] per committed step so interfaces
//! (chat CLI, tool server) can stream progress without polling the store.
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │    Engine    │────▶│  Event Bus   │────▶│  Subscribers │
//! │  (publish)   │     │  (broadcast) │     │   (recv)     │
//! └──────────────┘     └──────────────┘     └──────────────┘
//! ```
//!
//! Events are advisory. A lagging or absent subscriber never blocks or fails
//! a run; the checkpoint store stays the source of truth.

pub mod bus;
pub mod types;

pub use bus::{EventBus, EventBusExt, EventFilter, FilteredReceiver, SharedEventBus};
pub use types::StepEvent;
