use super::{Chunk, EndObserver, EndState, Sink, StreamId, Transform};
use crate::{MiddlewareError, ResponseHead, StreamError};
use bytes::Bytes;
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, trace};

/// Number of queued chunks a stream accepts before `write` starts reporting it as full.
pub const DEFAULT_HIGH_WATER_MARK: usize = 16;

enum Node {
    Sink(Box<dyn Sink>),
    Transform(Box<dyn Transform>),
}

#[derive(Debug)]
struct Link {
    target: Option<StreamId>,
    end: EndObserver,
    observed: bool,
    queued: usize,
    high_water_mark: usize,
    drain_waiters: Vec<StreamId>,
}

impl Link {
    fn new(target: Option<StreamId>) -> Self {
        Self {
            target,
            end: EndObserver::new(),
            observed: false,
            queued: 0,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            drain_waiters: vec![],
        }
    }
}

#[derive(Debug)]
enum Event {
    Write(StreamId, Chunk),
    Finish(StreamId),
    Drain(StreamId),
}

/// Link bookkeeping and the pending event queue, kept apart from the nodes so a node can be
/// invoked while its [`StageContext`] schedules work on other links.
#[derive(Debug, Default)]
struct Scheduler {
    links: Vec<Link>,
    events: VecDeque<Event>,
}

impl Scheduler {
    fn link(&self, id: StreamId) -> Result<&Link, StreamError> {
        self.links.get(id.0).ok_or(StreamError::UnknownStream { id })
    }

    fn link_mut(&mut self, id: StreamId) -> Result<&mut Link, StreamError> {
        self.links.get_mut(id.0).ok_or(StreamError::UnknownStream { id })
    }

    fn end_called(&self, id: StreamId) -> bool {
        self.link(id).map(|link| link.observed && link.end.has_end_called()).unwrap_or(false)
    }

    fn write(&mut self, id: StreamId, chunk: Chunk) -> Result<bool, StreamError> {
        let link = self.link_mut(id)?;
        if link.end.has_end_called() {
            return Err(StreamError::WriteAfterEnd { id });
        }

        link.queued += 1;
        let ready = link.queued < link.high_water_mark;
        trace!(stream = %id, queued = link.queued, ready, "chunk queued");

        self.events.push_back(Event::Write(id, chunk));
        Ok(ready)
    }

    fn end(&mut self, id: StreamId) -> Result<(), StreamError> {
        let link = self.link_mut(id)?;
        if !link.end.request_end() {
            return Err(StreamError::EndTwice { id });
        }
        trace!(stream = %id, "end requested");

        self.events.push_back(Event::Finish(id));
        Ok(())
    }

    fn wait_for_drain(&mut self, waiter: StreamId, target: StreamId) -> Result<(), StreamError> {
        let link = self.link_mut(target)?;
        let empty = link.queued == 0;
        if !empty && !link.drain_waiters.contains(&waiter) {
            link.drain_waiters.push(waiter);
        }

        if empty {
            self.events.push_back(Event::Drain(waiter));
        }
        Ok(())
    }

    fn dequeued(&mut self, id: StreamId) {
        let Some(link) = self.links.get_mut(id.0) else {
            return;
        };

        link.queued = link.queued.saturating_sub(1);
        if link.queued == 0 {
            for waiter in link.drain_waiters.drain(..) {
                trace!(stream = %id, waiter = %waiter, "drained");
                self.events.push_back(Event::Drain(waiter));
            }
        }
    }
}

/// The streams of one response, from the transport sink up to the current front.
pub struct StreamChain {
    nodes: Vec<Node>,
    scheduler: Scheduler,
    front: StreamId,
}

impl fmt::Debug for StreamChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamChain")
            .field("front", &self.front)
            .field("streams", &self.nodes.len())
            .field("pending_events", &self.scheduler.events.len())
            .finish()
    }
}

impl StreamChain {
    pub fn new(sink: Box<dyn Sink>) -> Self {
        Self {
            nodes: vec![Node::Sink(sink)],
            scheduler: Scheduler { links: vec![Link::new(None)], events: VecDeque::new() },
            front: StreamId::SINK,
        }
    }

    /// The stream application writes currently go into.
    #[inline]
    pub fn front(&self) -> StreamId {
        self.front
    }

    /// Number of streams, the sink included.
    #[inline]
    pub fn stream_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn target_of(&self, id: StreamId) -> Option<StreamId> {
        self.scheduler.link(id).ok().and_then(|link| link.target)
    }

    /// Installs `stream` as the new front and returns the previous front, which is where the new
    /// stream forwards its output.
    pub fn replace_stream(&mut self, stream: Box<dyn Transform>) -> StreamId {
        let previous = self.front;
        let id = StreamId(self.nodes.len());

        self.nodes.push(Node::Transform(stream));
        self.scheduler.links.push(Link::new(Some(previous)));
        self.front = id;

        debug!(stream = %id, target = %previous, "stream replaced");
        previous
    }

    pub fn add_end_observer(&mut self, id: StreamId) -> Result<(), StreamError> {
        self.scheduler.link_mut(id)?.observed = true;
        Ok(())
    }

    /// Whether `end()` has been requested on an observed stream. Unobserved streams report `false`.
    pub fn has_end_called(&self, id: StreamId) -> bool {
        self.scheduler.end_called(id)
    }

    pub fn end_state(&self, id: StreamId) -> Option<EndState> {
        self.scheduler.link(id).ok().map(|link| link.end.state())
    }

    pub fn set_high_water_mark(&mut self, id: StreamId, high_water_mark: usize) -> Result<(), StreamError> {
        self.scheduler.link_mut(id)?.high_water_mark = high_water_mark.max(1);
        Ok(())
    }

    /// Writes into the front stream. Returns `false` once the front is over its high-water mark.
    pub fn write(&mut self, chunk: Chunk) -> Result<bool, StreamError> {
        self.scheduler.write(self.front, chunk)
    }

    /// Requests the end of the front stream.
    pub fn end(&mut self) -> Result<(), StreamError> {
        self.scheduler.end(self.front)
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.scheduler.events.is_empty()
    }

    /// Whether the transport sink has physically completed.
    pub fn is_finished(&self) -> bool {
        self.end_state(StreamId::SINK) == Some(EndState::Finished)
    }

    /// Processes the oldest pending event. Returns `false` when there was nothing to do.
    pub fn step(&mut self, head: &mut ResponseHead) -> Result<bool, MiddlewareError> {
        let Some(event) = self.scheduler.events.pop_front() else {
            return Ok(false);
        };

        match event {
            Event::Write(id, chunk) => {
                self.scheduler.dequeued(id);
                let node = self.nodes.get_mut(id.0).ok_or(StreamError::UnknownStream { id })?;
                match node {
                    Node::Sink(sink) => {
                        head.mark_sent();
                        sink.write(head, into_bytes(chunk)?)?;
                    }
                    Node::Transform(stream) => {
                        let mut ctx = StageContext { scheduler: &mut self.scheduler, head, id };
                        stream.transform(chunk, &mut ctx)?;
                    }
                }
            }

            Event::Finish(id) => {
                self.scheduler.link_mut(id)?.end.complete();
                trace!(stream = %id, "stream finished");

                let node = self.nodes.get_mut(id.0).ok_or(StreamError::UnknownStream { id })?;
                match node {
                    Node::Sink(sink) => {
                        head.mark_sent();
                        sink.end(head)?;
                    }
                    Node::Transform(stream) => {
                        let mut ctx = StageContext { scheduler: &mut self.scheduler, head, id };
                        stream.finish(&mut ctx)?;
                    }
                }
            }

            Event::Drain(id) => {
                if let Some(Node::Transform(stream)) = self.nodes.get_mut(id.0) {
                    let mut ctx = StageContext { scheduler: &mut self.scheduler, head, id };
                    stream.drain(&mut ctx)?;
                }
            }
        }

        Ok(true)
    }

    /// Processes events until none are left.
    pub fn run_until_idle(&mut self, head: &mut ResponseHead) -> Result<(), MiddlewareError> {
        while self.step(head)? {}
        Ok(())
    }
}

fn into_bytes(chunk: Chunk) -> Result<Bytes, StreamError> {
    match chunk {
        Chunk::Bytes(bytes) => Ok(bytes),
        Chunk::Text(text) => Ok(Bytes::from(text)),
        Chunk::Json(_) => Err(StreamError::invalid_chunk("structured chunk reached the transport sink")),
    }
}

/// What a [`Transform`] sees of the chain while it is being invoked.
#[derive(Debug)]
pub struct StageContext<'a> {
    scheduler: &'a mut Scheduler,
    head: &'a mut ResponseHead,
    id: StreamId,
}

impl StageContext<'_> {
    /// The stream being invoked.
    #[inline]
    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn head(&self) -> &ResponseHead {
        self.head
    }

    pub fn head_mut(&mut self) -> &mut ResponseHead {
        self.head
    }

    /// See [`StreamChain::has_end_called`]; asks about the stream being invoked.
    pub fn has_end_called(&self) -> bool {
        self.scheduler.end_called(self.id)
    }

    pub fn target(&self) -> Option<StreamId> {
        self.scheduler.link(self.id).ok().and_then(|link| link.target)
    }

    fn target_or_err(&self) -> Result<StreamId, StreamError> {
        self.target().ok_or(StreamError::NoTarget { id: self.id })
    }

    /// Relays a chunk to the forward target. Returns `false` once the target is full; the caller
    /// should then stop and [`wait_for_drain`](Self::wait_for_drain).
    pub fn forward(&mut self, chunk: impl Into<Chunk>) -> Result<bool, StreamError> {
        let target = self.target_or_err()?;
        self.scheduler.write(target, chunk.into())
    }

    pub fn end_target(&mut self) -> Result<(), StreamError> {
        let target = self.target_or_err()?;
        self.scheduler.end(target)
    }

    /// Asks for [`Transform::drain`] to be called once the forward target has emptied.
    pub fn wait_for_drain(&mut self) -> Result<(), StreamError> {
        let target = self.target_or_err()?;
        self.scheduler.wait_for_drain(self.id, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{BufferSink, MockSink};
    use mockall::Sequence;

    struct Tag(&'static str);

    impl Transform for Tag {
        fn transform(&mut self, chunk: Chunk, ctx: &mut StageContext<'_>) -> Result<(), MiddlewareError> {
            match chunk {
                Chunk::Text(text) => ctx.forward(format!("{text}{}", self.0))?,
                other => ctx.forward(other)?,
            };
            Ok(())
        }
    }

    fn chain_with_buffer() -> (StreamChain, BufferSink) {
        let sink = BufferSink::new();
        (StreamChain::new(Box::new(sink.clone())), sink)
    }

    #[test]
    fn test_sink_receives_writes_then_end() {
        let mut sink = MockSink::new();
        let mut seq = Sequence::new();
        sink.expect_write()
            .withf(|_, bytes| bytes == &Bytes::from_static(b"hello"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        sink.expect_end().times(1).in_sequence(&mut seq).returning(|_| Ok(()));

        let mut chain = StreamChain::new(Box::new(sink));
        let mut head = ResponseHead::new();

        assert!(chain.write(Chunk::from("hello")).unwrap());
        chain.end().unwrap();
        chain.run_until_idle(&mut head).unwrap();

        assert!(chain.is_finished());
        assert!(head.headers_sent());
    }

    #[test]
    fn test_replace_stream_returns_previous_front() {
        let (mut chain, _sink) = chain_with_buffer();

        assert_eq!(chain.front(), StreamId::SINK);
        let first_target = chain.replace_stream(Box::new(Tag("a")));
        assert_eq!(first_target, StreamId::SINK);

        let second_target = chain.replace_stream(Box::new(Tag("b")));
        assert_eq!(second_target.index(), 1);
        assert_eq!(chain.front().index(), 2);
        assert_eq!(chain.target_of(chain.front()), Some(second_target));
        assert_eq!(chain.target_of(StreamId::SINK), None);
        assert_eq!(chain.stream_count(), 3);
    }

    #[test]
    fn test_last_installed_transform_sees_data_first() {
        let (mut chain, sink) = chain_with_buffer();
        let mut head = ResponseHead::new();

        chain.replace_stream(Box::new(Tag("-first")));
        chain.replace_stream(Box::new(Tag("-second")));

        chain.write(Chunk::from("x")).unwrap();
        chain.end().unwrap();
        chain.run_until_idle(&mut head).unwrap();

        assert_eq!(sink.body(), Bytes::from_static(b"x-second-first"));
        assert!(sink.is_ended());
    }

    #[test]
    fn test_write_after_end_is_a_fault() {
        let (mut chain, _sink) = chain_with_buffer();

        chain.end().unwrap();
        assert!(matches!(chain.write(Chunk::from("late")), Err(StreamError::WriteAfterEnd { .. })));
        assert!(matches!(chain.end(), Err(StreamError::EndTwice { .. })));
    }

    #[test]
    fn test_end_observer_is_opt_in() {
        let (mut chain, _sink) = chain_with_buffer();
        let mut head = ResponseHead::new();
        chain.replace_stream(Box::new(Tag("")));
        let front = chain.front();

        chain.end().unwrap();
        assert!(!chain.has_end_called(front));
        chain.add_end_observer(front).unwrap();
        assert!(chain.has_end_called(front));
        assert_eq!(chain.end_state(front), Some(EndState::EndRequested));

        chain.run_until_idle(&mut head).unwrap();
        assert_eq!(chain.end_state(front), Some(EndState::Finished));
    }

    #[test]
    fn test_structured_chunk_cannot_reach_sink() {
        let (mut chain, _sink) = chain_with_buffer();
        let mut head = ResponseHead::new();

        chain.write(Chunk::from(serde_json::json!({"a": 1}))).unwrap();
        let err = chain.run_until_idle(&mut head).unwrap_err();
        assert!(matches!(err, MiddlewareError::Stream { source: StreamError::InvalidChunk { .. } }));
    }

    #[test]
    fn test_closed_sink_faults() {
        let (mut chain, sink) = chain_with_buffer();
        let mut head = ResponseHead::new();
        sink.close();

        chain.write(Chunk::from("data")).unwrap();
        let err = chain.run_until_idle(&mut head).unwrap_err();
        assert!(matches!(err, MiddlewareError::Stream { source: StreamError::Closed }));
    }

    #[test]
    fn test_headers_latch_on_first_sink_write() {
        let (mut chain, _sink) = chain_with_buffer();
        let mut head = ResponseHead::new();
        chain.replace_stream(Box::new(Tag("")));

        chain.write(Chunk::from("x")).unwrap();
        assert!(chain.step(&mut head).unwrap());
        // the transform forwarded, the sink has not seen anything yet
        assert!(!head.headers_sent());

        assert!(chain.step(&mut head).unwrap());
        assert!(head.headers_sent());
        assert!(!chain.step(&mut head).unwrap());
    }

    #[test]
    fn test_write_reports_full_at_high_water_mark() {
        let (mut chain, _sink) = chain_with_buffer();
        let mut head = ResponseHead::new();
        chain.set_high_water_mark(StreamId::SINK, 2).unwrap();

        assert!(chain.write(Chunk::from("1")).unwrap());
        assert!(!chain.write(Chunk::from("2")).unwrap());

        chain.run_until_idle(&mut head).unwrap();
        assert!(chain.write(Chunk::from("3")).unwrap());
    }
}
