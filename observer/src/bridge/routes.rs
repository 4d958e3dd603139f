use crate::bridge::model::{Ack, BurstQuery, ErrorBody};
use anyhow::Context;
use futures::Stream;
use rfcore::hub::{Channel, HubEvent, Subscriber};
use rfcore::prelude::{DeviceIndex, EngineError, EngineResult, ScanConfig, SpectrumFrame, TuneRequest};
use rfcore::AcquisitionSupervisor;
use serde::Serialize;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use warp::http::StatusCode;
use warp::reply::{Reply, Response};
use warp::{sse, Filter, Rejection};

const BODY_LIMIT: u64 = 16 * 1024;
const FORWARD_DEPTH: usize = 16;
const FORWARD_POLL: Duration = Duration::from_millis(250);

/// HTTP control and streaming surface over one supervisor.
#[derive(Clone)]
pub struct Bridge {
    supervisor: Arc<AcquisitionSupervisor>,
    closing: Arc<AtomicBool>,
}

pub fn status_for(err: &EngineError) -> StatusCode {
    match err {
        EngineError::DeviceUnavailable(_) => StatusCode::NOT_FOUND,
        EngineError::AlreadyRunning(_) | EngineError::NotRunning(_) => StatusCode::CONFLICT,
        EngineError::OutOfRange { .. } | EngineError::InvalidInput(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        EngineError::DeviceOpenTimeout { .. } | EngineError::DeviceReadTimeout { .. } => {
            StatusCode::GATEWAY_TIMEOUT
        }
        EngineError::PersistenceFailure(_)
        | EngineError::CaptureWriteFailure(_)
        | EngineError::Driver(_)
        | EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_reply(err: &EngineError) -> Response {
    let status = status_for(err);
    if status.is_server_error() {
        log::warn!("request failed: {}", err);
    }
    warp::reply::with_status(warp::reply::json(&ErrorBody::from(err)), status).into_response()
}

fn reply<T: Serialize>(result: EngineResult<T>, status: StatusCode) -> Response {
    match result {
        Ok(value) => warp::reply::with_status(warp::reply::json(&value), status).into_response(),
        Err(err) => error_reply(&err),
    }
}

/// Runs a supervisor call that may block (joins, enumeration) off the reactor.
async fn blocking<T, F>(work: F) -> EngineResult<T>
where
    F: FnOnce() -> EngineResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .unwrap_or_else(|err| Err(EngineError::Internal(format!("request task failed: {}", err))))
}

impl Bridge {
    pub fn new(supervisor: Arc<AcquisitionSupervisor>) -> Self {
        Self {
            supervisor,
            closing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn routes(&self) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
        let bridge = self.clone();
        let with_bridge = warp::any().map(move || bridge.clone());

        let devices = warp::path!("api" / "devices")
            .and(warp::get())
            .and(with_bridge.clone())
            .and_then(list_devices);
        let all = warp::path!("api" / "devices" / "all")
            .and(warp::get())
            .and(with_bridge.clone())
            .and_then(all_devices);
        let device = warp::path!("api" / "devices" / DeviceIndex)
            .and(warp::get())
            .and(with_bridge.clone())
            .and_then(device_status);
        let start = warp::path!("api" / "devices" / DeviceIndex / "start")
            .and(warp::post())
            .and(warp::body::content_length_limit(BODY_LIMIT))
            .and(warp::body::json())
            .and(with_bridge.clone())
            .and_then(start_device);
        let stop = warp::path!("api" / "devices" / DeviceIndex / "stop")
            .and(warp::post())
            .and(with_bridge.clone())
            .and_then(stop_device);
        let tune = warp::path!("api" / "devices" / DeviceIndex / "tune")
            .and(warp::post())
            .and(warp::body::content_length_limit(BODY_LIMIT))
            .and(warp::body::json())
            .and(with_bridge.clone())
            .and_then(tune_device);
        let waterfall = warp::path!("api" / "devices" / DeviceIndex / "waterfall")
            .and(warp::get())
            .and(with_bridge.clone())
            .and_then(waterfall);
        let spectrum_stream = warp::path!("api" / "devices" / DeviceIndex / "spectrum")
            .and(warp::get())
            .and(warp::any().map(|| Channel::Spectrum))
            .and(with_bridge.clone())
            .and_then(event_stream);
        let burst_stream = warp::path!("api" / "devices" / DeviceIndex / "bursts")
            .and(warp::get())
            .and(warp::any().map(|| Channel::Bursts))
            .and(with_bridge.clone())
            .and_then(event_stream);
        let bursts = warp::path!("api" / "bursts")
            .and(warp::get())
            .and(warp::query::<BurstQuery>())
            .and(with_bridge)
            .and_then(recent_bursts);

        devices
            .or(all)
            .unify()
            .or(device)
            .unify()
            .or(start)
            .unify()
            .or(stop)
            .unify()
            .or(tune)
            .unify()
            .or(waterfall)
            .unify()
            .or(spectrum_stream)
            .unify()
            .or(burst_stream)
            .unify()
            .or(bursts)
            .unify()
    }

    /// Ends every open event stream; the server can then drain.
    pub fn close_streams(&self) {
        self.closing.store(true, Ordering::SeqCst);
    }

    /// Serves the routes on `bind` until `shutdown` resolves.
    pub async fn serve<S>(&self, bind: SocketAddr, shutdown: S) -> anyhow::Result<()>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let bridge = self.clone();
        let signal = async move {
            shutdown.await;
            bridge.close_streams();
        };
        let (addr, server) = warp::serve(self.routes())
            .try_bind_with_graceful_shutdown(bind, signal)
            .with_context(|| format!("binding HTTP bridge to {}", bind))?;
        log::info!("HTTP bridge listening on {}", addr);
        server.await;
        log::info!("HTTP bridge stopped");
        Ok(())
    }
}

async fn list_devices(bridge: Bridge) -> Result<Response, Infallible> {
    let result = blocking(move || Ok(bridge.supervisor.list_devices())).await;
    Ok(reply(result, StatusCode::OK))
}

async fn all_devices(bridge: Bridge) -> Result<Response, Infallible> {
    Ok(reply(Ok(bridge.supervisor.snapshot()), StatusCode::OK))
}

async fn device_status(index: DeviceIndex, bridge: Bridge) -> Result<Response, Infallible> {
    Ok(reply(bridge.supervisor.device_status(index), StatusCode::OK))
}

async fn start_device(
    index: DeviceIndex,
    config: ScanConfig,
    bridge: Bridge,
) -> Result<Response, Infallible> {
    let result = blocking(move || {
        bridge
            .supervisor
            .start(index, config)
            .map(|applied| ScanConfig::clone(&applied))
    })
    .await;
    Ok(reply(result, StatusCode::ACCEPTED))
}

async fn stop_device(index: DeviceIndex, bridge: Bridge) -> Result<Response, Infallible> {
    let result = blocking(move || {
        bridge
            .supervisor
            .stop(index)
            .map(|_| Ack::new(index, "stopped"))
    })
    .await;
    Ok(reply(result, StatusCode::OK))
}

async fn tune_device(
    index: DeviceIndex,
    request: TuneRequest,
    bridge: Bridge,
) -> Result<Response, Infallible> {
    let result = bridge
        .supervisor
        .tune(index, &request)
        .map(|merged| ScanConfig::clone(&merged));
    Ok(reply(result, StatusCode::ACCEPTED))
}

async fn waterfall(index: DeviceIndex, bridge: Bridge) -> Result<Response, Infallible> {
    if let Err(err) = bridge.supervisor.device_status(index) {
        return Ok(error_reply(&err));
    }
    let frames = bridge.supervisor.hub().waterfall(index);
    let frames: Vec<&SpectrumFrame> = frames.iter().map(|frame| &**frame).collect();
    Ok(reply(Ok(frames), StatusCode::OK))
}

async fn recent_bursts(query: BurstQuery, bridge: Bridge) -> Result<Response, Infallible> {
    let bursts = bridge.supervisor.recorder().recent_bursts(query.limit());
    Ok(reply(Ok(bursts), StatusCode::OK))
}

async fn event_stream(
    index: DeviceIndex,
    channel: Channel,
    bridge: Bridge,
) -> Result<Response, Infallible> {
    if let Err(err) = bridge.supervisor.device_status(index) {
        return Ok(error_reply(&err));
    }
    let stream = subscribe(&bridge, index, channel);
    Ok(sse::reply(sse::keep_alive().stream(stream)).into_response())
}

/// Registers a hub subscription for one HTTP client and bridges it onto an
/// async stream. The subscription lives until the client goes away.
fn subscribe(
    bridge: &Bridge,
    index: DeviceIndex,
    channel: Channel,
) -> impl Stream<Item = Result<sse::Event, Infallible>> + Send + 'static {
    let hub = bridge.supervisor.hub();
    let client_id = hub.next_client_id();
    let subscriber = hub.subscribe(client_id, index, channel);
    let (tx, rx) = mpsc::channel::<HubEvent>(FORWARD_DEPTH);
    let closing = Arc::clone(&bridge.closing);
    let spawned = thread::Builder::new()
        .name(format!("rf-sse-{}", client_id))
        .spawn(move || forward(subscriber, tx, &closing));
    if let Err(err) = spawned {
        log::warn!("client {}: cannot start event forwarder: {}", client_id, err);
    }

    futures::stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((Ok(sse_event(&event)), rx))
    })
}

/// Moves hub events onto the client's channel until either side closes.
fn forward(subscriber: Subscriber, tx: mpsc::Sender<HubEvent>, closing: &AtomicBool) {
    let subscription = subscriber.subscription();
    while !closing.load(Ordering::SeqCst) && !subscriber.is_closed() && !tx.is_closed() {
        let Some(event) = subscriber.recv_timeout(FORWARD_POLL) else {
            continue;
        };
        if tx.blocking_send(event).is_err() {
            break;
        }
    }
    log::debug!(
        "client {} left {:?} of device {} ({} dropped)",
        subscription.client_id,
        subscription.channel,
        subscription.device_index,
        subscriber.dropped()
    );
}

fn sse_event(event: &HubEvent) -> sse::Event {
    let built = match event {
        HubEvent::Spectrum(frame) => sse::Event::default()
            .event("spectrum")
            .id(frame.sequence.to_string())
            .json_data(&**frame),
        HubEvent::Burst(burst) => sse::Event::default()
            .event("burst")
            .id(burst.id.to_string())
            .json_data(&**burst),
    };
    built.unwrap_or_else(|err| sse::Event::default().event("error").data(err.to_string()))
}
