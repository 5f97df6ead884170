//! docrun execution engine
//!
//! Turns resolved documentation tests into a report:
//! - Resolves each test's run targets into concrete contexts
//! - Spawns the shared driver bridge and one browser session per context
//! - Runs steps in order with fail-fast skipping inside a context
//! - Finds elements by shorthand text or by AND-combined criteria
//! - Resolves `$$` meta references and `{{ }}` templates in step variables
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Runner                                                     │
//! │    ├── resolve_contexts(runOn, test) -> [Context]           │
//! │    ├── BridgeHandle::spawn() -> WebDriverFactory            │
//! │    └── per context (buffered by concurrentRunners)          │
//! │          ├── DriverFactory::start(caps) -> Driver           │
//! │          ├── StepExecutor::execute(step) -> StepOutcome     │
//! │          │     ├── element::find_element                    │
//! │          │     └── expression::resolve_expression           │
//! │          └── Outcome::aggregate(steps)                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Report { summary, specs[tests[contexts[steps]]] }          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod actions;
pub mod bridge;
pub mod contexts;
pub mod details;
pub mod driver;
pub mod element;
pub mod env;
pub mod error;
pub mod expression;
pub mod orchestrator;
pub mod upload;
pub mod visual;

pub use actions::{ActionContext, Actions, StepExecutor, StepOutcome};
pub use contexts::resolve_contexts;
pub use details::RunnerDetails;
pub use driver::{Capabilities, Driver, DriverFactory, ElementRef, Locator};
pub use element::{find_element, FindResult, FoundBy};
pub use env::Environment;
pub use error::{RunnerError, RunnerResult};
pub use expression::{evaluate_assertion, resolve_expression};
pub use orchestrator::Runner;
pub use upload::{ChangedFileUploader, DirectoryUploader};
