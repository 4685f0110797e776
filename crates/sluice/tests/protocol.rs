use futures::StreamExt;
use sluice::{
    ArrayChunk, Catalog, Chunk, ContainerKind, DataSource, DataType, Driver, EncoderRegistry,
    EntryDescription, Error, MsgpackEncoder, Parameters, Protocol, Reply, Request, ScalarType,
    Schema, SessionStore, StaticCatalog, flow, sources::IterSource,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

type Factory = Box<dyn Fn() -> Box<dyn DataSource> + Send + Sync>;

/// Catalog over source factories, one fresh handle per open.
#[derive(Default)]
struct TestCatalog(BTreeMap<String, Factory>);

impl TestCatalog {
    fn with(mut self, name: &str, factory: impl Fn() -> Box<dyn DataSource> + Send + Sync + 'static) -> Self {
        self.0.insert(name.to_owned(), Box::new(factory));
        self
    }
}

impl Catalog for TestCatalog {
    fn list_names(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    fn describe(&self, name: &str) -> sluice::Result<EntryDescription> {
        self.0
            .get(name)
            .map(|_| EntryDescription {
                description: None,
                driver: Driver::Range,
                container: ContainerKind::NdArray,
                user_parameters: vec![],
                metadata: serde_json::Map::new(),
            })
            .ok_or_else(|| Error::DatasetNotFound { name: name.into() })
    }

    fn instantiate(&self, name: &str, _: &Parameters) -> sluice::Result<Box<dyn DataSource>> {
        self.0
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| Error::DatasetNotFound { name: name.into() })
    }
}

/// Observes how far a source has been pulled and whether it was closed.
#[derive(Clone, Default)]
struct Probe {
    pulled: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl Probe {
    fn pulled(&self) -> usize {
        self.pulled.load(Ordering::SeqCst)
    }

    fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// A single-pass source of `n` one-element float64 chunks holding
    /// `0.0, 1.0, ...`, failing at index `fail_at` if given.
    fn source(&self, n: usize, fail_at: Option<usize>) -> Box<dyn DataSource> {
        let pulled = Arc::clone(&self.pulled);
        let closed = Arc::clone(&self.closed);
        let schema = Schema {
            datashape: None,
            dtype: DataType::Scalar(ScalarType::Float64),
            shape: vec![Some(n as u64)],
            npartitions: n,
            container: ContainerKind::NdArray,
            metadata: serde_json::Map::new(),
        };
        let chunks = (0..n).map(move |i| {
            pulled.fetch_add(1, Ordering::SeqCst);
            if Some(i) == fail_at {
                return Err(Error::Production {
                    reason: "disk on fire".into(),
                });
            }
            Ok(Chunk::NdArray(ArrayChunk::from_slice(&[i as f64])))
        });
        Box::new(IterSource::new(schema, chunks).on_close(move || closed.store(true, Ordering::SeqCst)))
    }
}

/// A single-pass source of `n` one-element float64 chunks counting up from
/// `first`.
fn counting_source(first: usize, n: usize) -> Box<dyn DataSource> {
    let schema = Schema {
        datashape: None,
        dtype: DataType::Scalar(ScalarType::Float64),
        shape: vec![Some(n as u64)],
        npartitions: n,
        container: ContainerKind::NdArray,
        metadata: serde_json::Map::new(),
    };
    let chunks = (first..first + n).map(|i| Ok(Chunk::NdArray(ArrayChunk::from_slice(&[i as f64]))));
    Box::new(IterSource::new(schema, chunks))
}

/// A driver whose discovery panics.
struct Explosive {
    closed: Arc<AtomicBool>,
}

impl DataSource for Explosive {
    fn discover(&mut self) -> sluice::Result<Schema> {
        panic!("driver bug");
    }

    fn chunks(&mut self) -> sluice::Result<sluice::ChunkStream> {
        Err(Error::StreamAlreadyConsumed)
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn protocol(catalog: impl Catalog, registry: EncoderRegistry) -> Protocol {
    Protocol::new(
        Arc::new(catalog),
        Arc::new(registry),
        Arc::new(SessionStore::default()),
    )
}

fn probed(n: usize, fail_at: Option<usize>) -> (Protocol, Probe) {
    let probe = Probe::default();
    let factory = probe.clone();
    let catalog = TestCatalog::default().with("probe", move || factory.source(n, fail_at));
    (protocol(catalog, EncoderRegistry::with_defaults()), probe)
}

fn formats(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| (*s).to_owned()).collect()
}

fn floats(data: &[u8]) -> Vec<f64> {
    data.chunks_exact(8)
        .map(|b| f64::from_le_bytes(b.try_into().unwrap()))
        .collect()
}

#[tokio::test]
async fn numbers_stream_end_to_end_with_raw_only() {
    let protocol = protocol(
        StaticCatalog::builtin(),
        EncoderRegistry::only(["raw"]).unwrap(),
    );

    let opened = protocol.open("numbers", &Parameters::new()).await.unwrap();
    assert_eq!(opened.container, ContainerKind::NdArray);
    assert_eq!(opened.shape, vec![Some(1000)]);
    assert_eq!(opened.npartitions, 10);
    assert_eq!(opened.dtype, DataType::Scalar(ScalarType::Float64));

    let mut read = protocol.read(&opened.source_id, &formats(&["raw"])).unwrap();
    let mut values = Vec::new();
    let mut frames = 0;
    while let Some(frame) = read.next_frame().await {
        let frame = frame.unwrap();
        assert_eq!(frame.format, "raw");
        assert_eq!(frame.container, ContainerKind::NdArray);
        assert_eq!(frame.len(), 100 * 8);
        values.extend(floats(&frame.data));
        frames += 1;
    }
    assert_eq!(frames, 10);
    assert_eq!(values, (0..1000).map(f64::from).collect::<Vec<_>>());
}

#[tokio::test]
async fn container_is_stable_across_reads() {
    let protocol = protocol(StaticCatalog::builtin(), EncoderRegistry::with_defaults());
    let opened = protocol.open("numbers", &Parameters::new()).await.unwrap();

    for accepted in [["raw"], ["msgpack"]] {
        let read = protocol.read(&opened.source_id, &formats(&accepted)).unwrap();
        let frames: Vec<_> = read.into_stream().collect().await;
        assert_eq!(frames.len(), 10);
        for frame in frames {
            assert_eq!(frame.unwrap().container, opened.container);
        }
    }
}

#[tokio::test]
async fn unknown_sessions_are_not_found() {
    let protocol = protocol(StaticCatalog::builtin(), EncoderRegistry::with_defaults());
    for token in ["01ARZ3NDEKTSV4RRFFQ69G5FAV", "definitely-not-a-token"] {
        assert!(matches!(
            protocol.read(token, &formats(&["raw"])),
            Err(Error::SessionNotFound { .. })
        ));
    }
}

#[tokio::test]
async fn negotiation_skips_unregistered_preferences() {
    let protocol = protocol(
        StaticCatalog::builtin(),
        EncoderRegistry::builder().register(MsgpackEncoder).build(),
    );
    let opened = protocol.open("numbers", &Parameters::new()).await.unwrap();

    let mut read = protocol
        .read(&opened.source_id, &formats(&["raw", "msgpack"]))
        .unwrap();
    assert_eq!(read.format(), "msgpack");
    assert_eq!(read.next_frame().await.unwrap().unwrap().format, "msgpack");
}

#[tokio::test]
async fn empty_preferences_pull_nothing() {
    let (protocol, probe) = probed(5, None);
    let opened = protocol.open("probe", &Parameters::new()).await.unwrap();

    let err = protocol.read(&opened.source_id, &[]).unwrap_err();
    assert_eq!(err, Error::NoCompatibleFormat { accepted: vec![] });
    assert_eq!(probe.pulled(), 0);
    assert!(!probe.closed());

    // The session survives a client error.
    let read = protocol.read(&opened.source_id, &formats(&["raw"])).unwrap();
    assert_eq!(read.into_stream().count().await, 5);
}

#[tokio::test]
async fn frames_follow_source_order() {
    let (protocol, _) = probed(25, None);
    let opened = protocol.open("probe", &Parameters::new()).await.unwrap();
    let read = protocol.read(&opened.source_id, &formats(&["raw"])).unwrap();

    let values: Vec<f64> = read
        .into_stream()
        .flat_map(|frame| futures::stream::iter(floats(&frame.unwrap().data)))
        .collect()
        .await;
    assert_eq!(values, (0..25).map(f64::from).collect::<Vec<_>>());
}

#[tokio::test]
async fn slow_consumer_holds_one_frame_in_flight() {
    let (protocol, probe) = probed(10, None);
    let opened = protocol.open("probe", &Parameters::new()).await.unwrap();
    let read = protocol.read(&opened.source_id, &formats(&["raw"])).unwrap();

    let cancel = CancellationToken::new();
    let (mut sink, mut frames) = flow::channel(cancel.clone());
    let pump = tokio::spawn(async move { flow::pump(read, &mut sink, &cancel).await });

    for received in 1..=3 {
        frames.next().await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(probe.pulled(), received);
    }

    let rest = frames.count().await;
    assert_eq!(rest, 7);
    let stats = pump.await.unwrap().unwrap();
    assert_eq!(stats.frames, 10);
    assert_eq!(stats.bytes, 80);
}

#[tokio::test]
async fn disconnect_stops_pulling_and_closes_source() {
    let (protocol, probe) = probed(10, None);
    let opened = protocol.open("probe", &Parameters::new()).await.unwrap();
    let read = protocol.read(&opened.source_id, &formats(&["raw"])).unwrap();

    let cancel = CancellationToken::new();
    let (mut sink, mut frames) = flow::channel(cancel.clone());
    let pump = tokio::spawn(async move { flow::pump(read, &mut sink, &cancel).await });

    frames.next().await.unwrap().unwrap();
    frames.next().await.unwrap().unwrap();
    drop(frames);

    assert_eq!(pump.await.unwrap().unwrap_err(), Error::Disconnected);
    assert_eq!(probe.pulled(), 2);
    assert!(probe.closed());
    assert!(protocol.sessions().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_sessions_keep_their_own_frames() {
    const N: usize = 200;
    let catalog = TestCatalog::default()
        .with("low", || counting_source(0, N))
        .with("high", || counting_source(10_000, N));
    let protocol = protocol(catalog, EncoderRegistry::with_defaults());

    let mut tasks = Vec::new();
    for (name, first) in [("low", 0), ("high", 10_000)] {
        let opened = protocol.open(name, &Parameters::new()).await.unwrap();
        let read = protocol.read(&opened.source_id, &formats(&["raw"])).unwrap();

        let cancel = CancellationToken::new();
        let (mut sink, mut frames) = flow::channel(cancel.clone());
        let pump = tokio::spawn(async move { flow::pump(read, &mut sink, &cancel).await });
        let consumer = tokio::spawn(async move {
            let mut values = Vec::new();
            while let Some(frame) = frames.next().await {
                values.extend(floats(&frame.unwrap().data));
                tokio::task::yield_now().await;
            }
            values
        });
        tasks.push((first, pump, consumer));
    }

    for (first, pump, consumer) in tasks {
        let values = consumer.await.unwrap();
        let expected: Vec<f64> = (first..first + N).map(|i| i as f64).collect();
        assert_eq!(values, expected);
        assert_eq!(pump.await.unwrap().unwrap().frames, N as u64);
    }
}

#[tokio::test]
async fn concurrent_reads_are_rejected() {
    let protocol = protocol(StaticCatalog::builtin(), EncoderRegistry::with_defaults());
    let opened = protocol.open("numbers", &Parameters::new()).await.unwrap();

    let first = protocol.read(&opened.source_id, &formats(&["raw"])).unwrap();
    assert!(matches!(
        protocol.read(&opened.source_id, &formats(&["raw"])),
        Err(Error::SessionBusy { .. })
    ));

    assert_eq!(first.into_stream().count().await, 10);
    assert!(protocol.read(&opened.source_id, &formats(&["raw"])).is_ok());
}

#[tokio::test]
async fn production_failure_ends_the_session() {
    let (protocol, probe) = probed(5, Some(2));
    let opened = protocol.open("probe", &Parameters::new()).await.unwrap();

    let cancel = CancellationToken::new();
    let read = protocol.read(&opened.source_id, &formats(&["raw"])).unwrap();
    let (mut sink, frames) = flow::channel(cancel.clone());
    let pump = tokio::spawn(async move { flow::pump(read, &mut sink, &cancel).await });

    let received: Vec<_> = frames.collect().await;
    assert_eq!(received.len(), 3);
    assert!(received[0].is_ok() && received[1].is_ok());
    assert!(matches!(received[2], Err(Error::Production { .. })));
    assert!(matches!(
        pump.await.unwrap(),
        Err(Error::Production { .. })
    ));

    assert!(probe.closed());
    assert!(matches!(
        protocol.read(&opened.source_id, &formats(&["raw"])),
        Err(Error::SessionNotFound { .. })
    ));
}

#[tokio::test]
async fn single_pass_sources_refuse_a_second_read() {
    let (protocol, probe) = probed(3, None);
    let opened = protocol.open("probe", &Parameters::new()).await.unwrap();

    let read = protocol.read(&opened.source_id, &formats(&["raw"])).unwrap();
    assert_eq!(read.into_stream().count().await, 3);

    assert_eq!(
        protocol
            .read(&opened.source_id, &formats(&["raw"]))
            .unwrap_err(),
        Error::StreamAlreadyConsumed
    );
    assert!(!probe.closed());
    assert_eq!(protocol.sessions().len(), 1);
}

#[tokio::test]
async fn failed_discovery_creates_no_session() {
    let catalog = StaticCatalog::from_json(
        r#"{"sources": {"ragged": {"driver": "records",
            "args": {"columns": ["a", "b"], "rows": [[1, 2], [3]]}}}}"#,
    )
    .unwrap();
    let protocol = protocol(catalog, EncoderRegistry::with_defaults());

    assert!(matches!(
        protocol.open("ragged", &Parameters::new()).await,
        Err(Error::DiscoveryFailed { .. })
    ));
    assert!(matches!(
        protocol.open("missing", &Parameters::new()).await,
        Err(Error::DatasetNotFound { .. })
    ));
    assert!(protocol.sessions().is_empty());
}

#[tokio::test]
async fn panicking_discovery_still_closes_the_source() {
    let closed = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&closed);
    let catalog = TestCatalog::default().with("explosive", move || {
        Box::new(Explosive {
            closed: Arc::clone(&flag),
        })
    });
    let protocol = protocol(catalog, EncoderRegistry::with_defaults());

    match protocol.open("explosive", &Parameters::new()).await {
        Err(Error::DiscoveryFailed { name, reason }) => {
            assert_eq!(name, "explosive");
            assert!(reason.contains("driver bug"), "{reason}");
        }
        other => panic!("unexpected open result {other:?}"),
    }
    assert!(closed.load(Ordering::SeqCst));
    assert!(protocol.sessions().is_empty());
}

#[tokio::test]
async fn invalid_parameters_are_rejected() {
    let protocol = protocol(StaticCatalog::builtin(), EncoderRegistry::with_defaults());
    let mut params = Parameters::new();
    params.insert("chunk_len".into(), "lots".into());

    assert!(matches!(
        protocol.open("numbers", &params).await,
        Err(Error::InvalidParameters { .. })
    ));
}

#[tokio::test]
async fn requests_dispatch_through_handle() {
    let protocol = protocol(StaticCatalog::builtin(), EncoderRegistry::with_defaults());

    let Reply::Opened(opened) = protocol
        .handle(Request::Open {
            name: "numbers".into(),
            parameters: Parameters::new(),
        })
        .await
        .unwrap()
    else {
        panic!("open did not reply with a description");
    };

    let reply = protocol
        .handle(Request::Close {
            source_id: opened.source_id.clone(),
        })
        .await
        .unwrap();
    assert!(matches!(reply, Reply::Closed(closed) if closed.closed));

    assert!(matches!(
        protocol
            .handle(Request::Read {
                source_id: opened.source_id,
                accepted_formats: formats(&["raw"]),
            })
            .await,
        Err(Error::SessionNotFound { .. })
    ));
}

#[tokio::test]
async fn idle_sessions_are_swept() {
    let protocol = protocol(StaticCatalog::builtin(), EncoderRegistry::with_defaults());
    let opened = protocol.open("numbers", &Parameters::new()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(protocol.sessions().sweep_idle(Duration::from_millis(1)), 1);
    assert!(matches!(
        protocol.read(&opened.source_id, &formats(&["raw"])),
        Err(Error::SessionNotFound { .. })
    ));
}

#[test]
fn info_lists_sources_and_formats() {
    let protocol = protocol(StaticCatalog::builtin(), EncoderRegistry::with_defaults());
    let info = protocol.info();
    assert_eq!(info.formats, vec!["raw", "msgpack"]);
    assert_eq!(info.sources.len(), 1);
    assert_eq!(info.sources[0].name, "numbers");
    assert_eq!(info.sources[0].entry.container, ContainerKind::NdArray);
}
