//! Reference transaction bodies
//!
//! Small bodies used by tests, benchmarks and as examples of the
//! [`TxnBody`] contract.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};
use txnflow_concurrency::{ConstraintView, TxnBody, TxnContext};
use txnflow_core::{Key, Value};

/// Does nothing and commits.
#[derive(Debug, Clone, Copy, Default)]
pub struct Noop;

impl TxnBody for Noop {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn readset(&self) -> BTreeSet<Key> {
        BTreeSet::new()
    }

    fn writeset(&self) -> BTreeSet<Key> {
        BTreeSet::new()
    }

    fn run(&mut self, _ctx: &mut TxnContext<'_>) {}

    fn fork(&self) -> Box<dyn TxnBody> {
        Box::new(*self)
    }
}

/// Writes fixed values.
#[derive(Debug, Clone, Default)]
pub struct Put {
    values: BTreeMap<Key, Value>,
}

impl Put {
    /// Put every `(key, value)` pair.
    pub fn new(values: impl IntoIterator<Item = (Key, Value)>) -> Self {
        Self {
            values: values.into_iter().collect(),
        }
    }
}

impl TxnBody for Put {
    fn name(&self) -> &'static str {
        "put"
    }

    fn readset(&self) -> BTreeSet<Key> {
        BTreeSet::new()
    }

    fn writeset(&self) -> BTreeSet<Key> {
        self.values.keys().copied().collect()
    }

    fn run(&mut self, ctx: &mut TxnContext<'_>) {
        for (key, value) in &self.values {
            ctx.write(*key, *value);
        }
    }

    fn fork(&self) -> Box<dyn TxnBody> {
        Box::new(self.clone())
    }
}

/// Commits only when every key holds the expected value.
#[derive(Debug, Clone, Default)]
pub struct Expect {
    expected: BTreeMap<Key, Value>,
}

impl Expect {
    /// Expect every `(key, value)` pair.
    pub fn new(expected: impl IntoIterator<Item = (Key, Value)>) -> Self {
        Self {
            expected: expected.into_iter().collect(),
        }
    }
}

impl TxnBody for Expect {
    fn name(&self) -> &'static str {
        "expect"
    }

    fn readset(&self) -> BTreeSet<Key> {
        self.expected.keys().copied().collect()
    }

    fn writeset(&self) -> BTreeSet<Key> {
        BTreeSet::new()
    }

    fn run(&mut self, ctx: &mut TxnContext<'_>) {
        let matches = self
            .expected
            .iter()
            .all(|(key, value)| ctx.read(*key) == Some(*value));
        if !matches {
            ctx.abort();
        }
    }

    fn fork(&self) -> Box<dyn TxnBody> {
        Box::new(self.clone())
    }
}

/// Reads the read set and increments every key of the write set.
#[derive(Debug, Clone, Default)]
pub struct Rmw {
    readset: BTreeSet<Key>,
    writeset: BTreeSet<Key>,
    work: Duration,
}

impl Rmw {
    /// Read `readset`, increment `writeset`.
    pub fn new(
        readset: impl IntoIterator<Item = Key>,
        writeset: impl IntoIterator<Item = Key>,
    ) -> Self {
        Self {
            readset: readset.into_iter().collect(),
            writeset: writeset.into_iter().collect(),
            work: Duration::ZERO,
        }
    }

    /// Spin for `work` inside the body, simulating application logic.
    pub fn with_work(mut self, work: Duration) -> Self {
        self.work = work;
        self
    }
}

impl TxnBody for Rmw {
    fn name(&self) -> &'static str {
        "rmw"
    }

    fn readset(&self) -> BTreeSet<Key> {
        self.readset.clone()
    }

    fn writeset(&self) -> BTreeSet<Key> {
        self.writeset.clone()
    }

    fn run(&mut self, ctx: &mut TxnContext<'_>) {
        for key in &self.readset {
            let _ = ctx.read(*key);
        }
        for key in &self.writeset {
            let current = ctx.read(*key).unwrap_or(0);
            ctx.write(*key, current + 1);
        }
        spin_for(self.work);
    }

    fn fork(&self) -> Box<dyn TxnBody> {
        Box::new(self.clone())
    }
}

/// Withdraws from one of two accounts while their joint balance stays at or
/// above a limit.
///
/// `validate` requires the joint balance re-read at the commit timestamp to
/// still respect the limit when the withdrawal was taken.
#[derive(Debug, Clone)]
pub struct WriteCheck {
    checking: Key,
    savings: Key,
    from: Key,
    amount: Value,
    limit: Value,
    withdrew: Option<bool>,
}

impl WriteCheck {
    /// Withdraw `amount` from `checking` if `checking + savings - amount >= limit`.
    pub fn from_checking(checking: Key, savings: Key, amount: Value, limit: Value) -> Self {
        Self {
            checking,
            savings,
            from: checking,
            amount,
            limit,
            withdrew: None,
        }
    }

    /// Withdraw `amount` from `savings` if `checking + savings - amount >= limit`.
    pub fn from_savings(checking: Key, savings: Key, amount: Value, limit: Value) -> Self {
        Self {
            from: savings,
            ..Self::from_checking(checking, savings, amount, limit)
        }
    }

    /// Whether the last run withdrew. `None` before the first run.
    pub fn withdrew(&self) -> Option<bool> {
        self.withdrew
    }
}

impl TxnBody for WriteCheck {
    fn name(&self) -> &'static str {
        "write-check"
    }

    fn readset(&self) -> BTreeSet<Key> {
        BTreeSet::from([self.checking, self.savings])
    }

    fn writeset(&self) -> BTreeSet<Key> {
        BTreeSet::from([self.from])
    }

    fn run(&mut self, ctx: &mut TxnContext<'_>) {
        let (Some(checking), Some(savings)) = (ctx.read(self.checking), ctx.read(self.savings))
        else {
            ctx.abort();
            return;
        };
        let allowed = checking + savings - self.amount >= self.limit;
        self.withdrew = Some(allowed);
        if !allowed {
            ctx.abort();
            return;
        }
        let balance = if self.from == self.checking {
            checking
        } else {
            savings
        };
        ctx.write(self.from, balance - self.amount);
    }

    fn validate(&self, view: &ConstraintView) -> bool {
        if self.withdrew != Some(true) {
            return true;
        }
        match (view.get(self.checking), view.get(self.savings)) {
            (Some(checking), Some(savings)) => checking + savings >= self.limit,
            _ => false,
        }
    }

    fn fork(&self) -> Box<dyn TxnBody> {
        Box::new(Self {
            withdrew: None,
            ..self.clone()
        })
    }
}

fn spin_for(duration: Duration) {
    if duration.is_zero() {
        return;
    }
    let start = Instant::now();
    while start.elapsed() < duration {
        std::hint::spin_loop();
    }
}
