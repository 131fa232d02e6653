use futures::stream::{Stream, StreamExt as _};
use tokio::task::JoinHandle;

#[derive(Debug)]
pub enum LookaheadError<E> {
    /// `next` was called again before the previously returned call
    /// completed.
    OverlappedCall,
    /// The underlying sequence failed; subsequent calls report end of
    /// sequence.
    Faulted(E),
    /// The background fetch task died without producing an outcome.
    FetchTaskLost,
}

impl<E: std::fmt::Display> std::fmt::Display for LookaheadError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OverlappedCall => f.write_str("overlapped call to next"),
            Self::Faulted(error) => write!(f, "sequence failed: {error}"),
            Self::FetchTaskLost => f.write_str("lookahead fetch task lost"),
        }
    }
}

/// Eager one-element lookahead over an async sequence.
///
/// The fetch of the next element is already in flight when the wrapper is
/// constructed, and a new fetch starts the moment `next` hands an element
/// out, so at most one fetch is pending at any time. The fetched element is
/// exposed through `current` after a successful `next`.
pub struct Lookahead<S, T, E>
where
    S: Stream<Item = Result<T, E>> + Send + Unpin + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    pending: Option<JoinHandle<(Option<Result<T, E>>, S)>>,
    current: Option<T>,
    in_call: bool,
}

impl<S, T, E> Lookahead<S, T, E>
where
    S: Stream<Item = Result<T, E>> + Send + Unpin + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    /// Wraps `stream` and immediately begins fetching its first element.
    /// Must be called within a tokio runtime.
    pub fn new(stream: S) -> Self {
        Self {
            pending: Some(begin_fetch(stream)),
            current: None,
            in_call: false,
        }
    }

    /// Resolves the pending fetch. Returns `true` and stores the element in
    /// `current` on success; returns `false` and clears `current` at end of
    /// sequence. A source failure clears `current`, and every later call
    /// reports end of sequence.
    pub async fn next(&mut self) -> Result<bool, LookaheadError<E>> {
        if self.in_call {
            return Err(LookaheadError::OverlappedCall);
        }
        let Some(handle) = self.pending.take() else {
            self.current = None;
            return Ok(false);
        };

        self.in_call = true;
        let joined = handle.await;
        self.in_call = false;

        let (item, stream) = match joined {
            Ok(r) => r,
            Err(join_error) => {
                self.current = None;
                if join_error.is_panic() {
                    std::panic::resume_unwind(join_error.into_panic());
                }
                return Err(LookaheadError::FetchTaskLost);
            }
        };

        match item {
            Some(Ok(value)) => {
                self.current = Some(value);
                self.pending = Some(begin_fetch(stream));
                Ok(true)
            }
            Some(Err(error)) => {
                self.current = None;
                Err(LookaheadError::Faulted(error))
            }
            None => {
                self.current = None;
                Ok(false)
            }
        }
    }

    pub fn current(&self) -> Option<&T> {
        self.current.as_ref()
    }

    /// Moves the current element out, leaving `current` empty until the
    /// next successful `next`.
    pub fn take_current(&mut self) -> Option<T> {
        self.current.take()
    }
}

fn begin_fetch<S, T, E>(mut stream: S) -> JoinHandle<(Option<Result<T, E>>, S)>
where
    S: Stream<Item = Result<T, E>> + Send + Unpin + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    tokio::spawn(async move {
        let item = stream.next().await;
        (item, stream)
    })
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::{Lookahead, LookaheadError};

    #[tokio::test]
    async fn current_follows_next() {
        let items: Vec<Result<u32, String>> = vec![Ok(1), Ok(2)];
        let mut la = Lookahead::new(stream::iter(items));

        assert!(la.current().is_none());

        assert!(la.next().await.unwrap());
        assert_eq!(la.current(), Some(&1));

        assert!(la.next().await.unwrap());
        assert_eq!(la.current(), Some(&2));

        assert!(!la.next().await.unwrap());
        assert!(la.current().is_none());

        // end of sequence is sticky
        assert!(!la.next().await.unwrap());
    }

    #[tokio::test]
    async fn overlapped_call_is_rejected() {
        let pending_stream = stream::pending::<Result<u32, String>>();
        let mut la = Lookahead::new(pending_stream);

        {
            let first = la.next();
            futures::pin_mut!(first);
            assert!(futures::poll!(first.as_mut()).is_pending());
            // `first` is dropped mid-call
        }

        match la.next().await {
            Err(LookaheadError::OverlappedCall) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn fault_then_end_of_sequence() {
        let items: Vec<Result<u32, String>> = vec![Ok(1), Err("gone".into())];
        let mut la = Lookahead::new(stream::iter(items));

        assert!(la.next().await.unwrap());
        assert_eq!(la.take_current(), Some(1));

        match la.next().await {
            Err(LookaheadError::Faulted(e)) => assert_eq!(e, "gone"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(la.current().is_none());

        // no spurious overlap error after the fault
        assert!(!la.next().await.unwrap());
    }
}
