//! Runtime context: replaces the original's global mutable state
//! (`debugflag`, `traceflag`, a process-wide `Cap` object) with one
//! value constructed in `main` and threaded into every engine call.

use crate::config::Config;
use crate::identity::Identity;
use crate::privilege::Broker;

pub struct RunContext {
    pub broker: Broker,
    pub identity: Identity,
    pub config: Config,
}

impl RunContext {
    pub fn new(broker: Broker, identity: Identity, config: Config) -> Self {
        RunContext { broker, identity, config }
    }

    pub fn now(&self) -> i64 {
        crate::time::now()
    }
}
