// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! In-memory SCPI instrument used by the unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::backend::{VisaBackend, VisaSession};
use crate::config::VisaConfig;
use crate::error::{VisaError, VisaResult};

#[derive(Default)]
struct Shared {
    opens: AtomicU32,
    broken: AtomicBool,
    registers: Mutex<HashMap<String, String>>,
    silent: Mutex<HashSet<String>>,
    written: Mutex<Vec<String>>,
}

/// Answers `?` commands from a register map. `*ESR?` reads clear the
/// register and `*CLS` clears it too.
#[derive(Clone, Default)]
pub(crate) struct SimulatedInstrument {
    shared: Arc<Shared>,
}

impl SimulatedInstrument {
    pub(crate) fn new() -> Self {
        let instrument = Self::default();
        instrument.set_register("*STB?", "0");
        instrument.set_register("*ESR?", "0");
        instrument.set_register("*IDN?", "ACME,PSU-9000,42,1.0");
        instrument
    }

    pub(crate) fn set_register(&self, query: &str, value: &str) {
        self.shared
            .registers
            .lock()
            .insert(query.to_string(), value.to_string());
    }

    pub(crate) fn set_silent(&self, query: &str) {
        self.shared.silent.lock().insert(query.to_string());
    }

    pub(crate) fn set_broken(&self, broken: bool) {
        self.shared.broken.store(broken, Ordering::SeqCst);
    }

    pub(crate) fn opens(&self) -> u32 {
        self.shared.opens.load(Ordering::SeqCst)
    }

    pub(crate) fn written(&self) -> Vec<String> {
        self.shared.written.lock().clone()
    }

    fn respond(&self, message: &str) -> Option<String> {
        let mut answers = Vec::new();
        for part in message.split(';').map(str::trim) {
            if !part.ends_with('?') {
                if part == "*CLS" {
                    self.set_register("*ESR?", "0");
                }
                continue;
            }
            if self.shared.silent.lock().contains(part) {
                return None;
            }
            let mut registers = self.shared.registers.lock();
            let value = registers.get(part).cloned().unwrap_or_default();
            if part == "*ESR?" {
                registers.insert(part.to_string(), "0".to_string());
            }
            answers.push(value);
        }
        if answers.is_empty() {
            None
        } else {
            Some(answers.join(";"))
        }
    }
}

#[async_trait]
impl VisaBackend for SimulatedInstrument {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn open(&self, config: &VisaConfig) -> VisaResult<Box<dyn VisaSession>> {
        if self.shared.broken.load(Ordering::SeqCst) {
            return Err(VisaError::open(config.resource(), "instrument unreachable"));
        }
        self.shared.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimulatedSession {
            instrument: self.clone(),
            config: config.clone(),
            replies: VecDeque::new(),
        }))
    }
}

struct SimulatedSession {
    instrument: SimulatedInstrument,
    config: VisaConfig,
    replies: VecDeque<String>,
}

#[async_trait]
impl VisaSession for SimulatedSession {
    async fn write(&mut self, message: &str) -> VisaResult<()> {
        if self.instrument.shared.broken.load(Ordering::SeqCst) {
            return Err(VisaError::io(self.config.resource(), "connection reset"));
        }
        self.instrument
            .shared
            .written
            .lock()
            .push(message.to_string());
        if let Some(reply) = self.instrument.respond(message) {
            self.replies.push_back(reply);
        }
        Ok(())
    }

    async fn read(&mut self) -> VisaResult<String> {
        self.replies
            .pop_front()
            .ok_or_else(|| VisaError::timeout(self.config.resource(), self.config.timeout))
    }

    async fn close(&mut self) -> VisaResult<()> {
        self.replies.clear();
        Ok(())
    }
}
