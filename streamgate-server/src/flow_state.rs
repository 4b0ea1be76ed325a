use tokio::sync::watch;

/// Состояние конечного автомата провайдера. Новый проход стартует только из
/// `idle`, проверка и переход выполняются атомарно.
#[derive(Debug)]
pub(crate) struct FlowState<S> {
    tx: watch::Sender<S>,
    idle: S,
}

impl<S> FlowState<S>
where
    S: Copy + PartialEq + Send + Sync,
{
    pub(crate) fn new(idle: S) -> Self {
        let (tx, _rx) = watch::channel(idle);
        Self { tx, idle }
    }

    pub(crate) fn try_begin(&self, next: S) -> bool {
        self.tx.send_if_modified(|state| {
            if *state != self.idle {
                return false;
            }
            *state = next;
            true
        })
    }

    /// Переход `from -> to`, только если автомат все еще в `from`.
    pub(crate) fn advance(&self, from: S, to: S) -> bool {
        self.tx.send_if_modified(|state| {
            if *state != from {
                return false;
            }
            *state = to;
            true
        })
    }

    pub(crate) fn set(&self, state: S) {
        self.tx.send_replace(state);
    }

    pub(crate) fn reset(&self) {
        self.set(self.idle);
    }

    pub(crate) fn get(&self) -> S {
        *self.tx.borrow()
    }

    pub(crate) fn watch(&self) -> watch::Receiver<S> {
        self.tx.subscribe()
    }
}
