//! One headless Chromium page driven over CDP.
//!
//! The controller translates CDP lifecycle and network events into
//! [`PageEvent`]s and feeds them to a fresh [`IdleDetector`] for every
//! navigation. Engine switches that Chromium only accepts at launch time
//! (file access, web security, image loading) are turned into command-line
//! flags, so each controller owns its own browser process.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetScriptExecutionDisabledParams,
};
use chromiumoxide::cdp::browser_protocol::network::{
    self, EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent, Headers,
    SetExtraHttpHeadersParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    self as cdp_page, AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat,
    EventFrameNavigated, EventFrameStartedLoading, EventLoadEventFired, FrameId, NavigateParams,
};
use chromiumoxide::cdp::js_protocol::runtime::{
    self, AddBindingParams, EvaluateParams, EventBindingCalled, EventExceptionThrown,
    ExceptionDetails,
};
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use uuid::Uuid;

use super::bridge::{self, PageErrorReport, RunToken, TraceFrame, BRIDGE_BINDING};
use super::scripts::{bootstrap_script, call_expression};
use crate::config::{EngineSettings, PageOptions, RenderOptions};
use crate::idle::{wait_for_quiescence, IdleDetector, LoadStatus, PageEvent, Settled};
use crate::progress::{log_progress, ProgressCallback};
use crate::{Result, WatchError};

/// Launch settings shared by every page of a run.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Chrome/Chromium binary; detected when `None`.
    pub executable: Option<PathBuf>,
    pub no_sandbox: bool,
    /// Timeout for individual CDP requests.
    pub request_timeout: Duration,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            executable: None,
            no_sandbox: false,
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Chromium flags for engine settings that cannot change after launch.
pub fn engine_flags(settings: &EngineSettings) -> Vec<&'static str> {
    let mut flags = Vec::new();
    if settings.local_to_remote_url_access_enabled {
        flags.push("--allow-file-access-from-files");
    }
    if !settings.web_security_enabled {
        flags.push("--disable-web-security");
    }
    if !settings.load_images {
        flags.push("--blink-settings=imagesEnabled=false");
    }
    flags
}

pub struct PageController {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    pumps: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
    sender: mpsc::UnboundedSender<PageEvent>,
    events: mpsc::UnboundedReceiver<PageEvent>,
    resource_timeout: Option<Duration>,
    profile_dir: PathBuf,
}

impl PageController {
    /// Starts a browser configured for `options` with one blank page.
    pub async fn launch(
        options: &PageOptions,
        launch: &LaunchOptions,
        token: &RunToken,
        progress: Option<ProgressCallback>,
    ) -> Result<Self> {
        let profile_dir = std::env::temp_dir().join(format!(
            "pagewatch-{}-{}",
            std::process::id(),
            Uuid::new_v4().simple()
        ));
        let config = browser_config(options, launch, &profile_dir)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|err| WatchError::browser(format!("failed to launch Chromium: {err}")))?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    trace!("cdp handler: {err}");
                }
            }
        });

        let page = match prepare_page(&browser, options).await {
            Ok(page) => page,
            Err(err) => {
                abandon(browser, handler, Vec::new(), &profile_dir).await;
                return Err(err);
            }
        };

        let (sender, events) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let mut pumps = Vec::with_capacity(2);
        match spawn_lifecycle_pump(&page, sender.clone(), cancel.clone()).await {
            Ok(pump) => pumps.push(pump),
            Err(err) => {
                abandon(browser, handler, pumps, &profile_dir).await;
                return Err(err);
            }
        }
        match spawn_diagnostics_pump(&page, token.clone(), progress, cancel.clone()).await {
            Ok(pump) => pumps.push(pump),
            Err(err) => {
                abandon(browser, handler, pumps, &profile_dir).await;
                return Err(err);
            }
        }

        Ok(Self {
            browser,
            page,
            handler,
            pumps,
            cancel,
            sender,
            events,
            resource_timeout: options.settings.resource_timeout,
            profile_dir,
        })
    }

    /// Navigates to `url` and waits until the page goes quiet.
    pub async fn open(&mut self, url: &str, render: &RenderOptions) -> Result<Settled> {
        // Leftovers from the blank page or an earlier navigation.
        while self.events.try_recv().is_ok() {}

        let detector = IdleDetector::new(render.delay).with_resource_timeout(self.resource_timeout);
        let page = self.page.clone();
        let sender = self.sender.clone();
        let target = url.to_string();
        let navigation = tokio::spawn(async move {
            let failure = match page.execute(NavigateParams::new(target)).await {
                Ok(response) => response.result.error_text.clone(),
                Err(err) => Some(err.to_string()),
            };
            if let Some(reason) = failure {
                let _ = sender.send(PageEvent::LoadFinished(LoadStatus::Fail(reason)));
            }
        });

        let settled = wait_for_quiescence(detector, &mut self.events, url, render.max_wait).await;
        navigation.abort();
        let settled = settled?;
        debug!(
            url,
            location = %settled.location,
            events = settled.events,
            elapsed_ms = settled.elapsed.as_millis() as u64,
            "page stable"
        );
        Ok(settled)
    }

    /// Calls `function` in the page with JSON arguments and returns its
    /// JSON result (`null` for `undefined`).
    pub async fn evaluate(&self, function: &str, args: &[Value]) -> Result<Value> {
        let expression = call_expression(function, args)?;
        let params = EvaluateParams::builder()
            .expression(expression)
            .return_by_value(true)
            .await_promise(true)
            .build()
            .map_err(WatchError::Script)?;
        let result = self
            .page
            .evaluate_expression(params)
            .await
            .map_err(|err| WatchError::Script(err.to_string()))?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    /// PNG capture of the page.
    pub async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(full_page)
            .build();
        Ok(self.page.screenshot(params).await?)
    }

    pub async fn render_to_file(&self, path: &Path, full_page: bool) -> Result<()> {
        let bytes = self.screenshot(full_page).await?;
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    /// Shuts the browser down and removes its profile directory.
    pub async fn close(self) -> Result<()> {
        let PageController {
            mut browser,
            page,
            handler,
            pumps,
            cancel,
            profile_dir,
            ..
        } = self;

        cancel.cancel();
        for pump in pumps {
            pump.abort();
        }
        if let Err(err) = page.close().await {
            debug!("page close: {err}");
        }
        let closed = browser.close().await;
        if let Err(err) = browser.wait().await {
            debug!("browser wait: {err}");
        }
        handler.abort();
        if let Err(err) = tokio::fs::remove_dir_all(&profile_dir).await {
            trace!(path = %profile_dir.display(), "profile cleanup: {err}");
        }
        closed.map(|_| ()).map_err(WatchError::from)
    }
}

/// Tears down a browser whose controller never finished launching.
async fn abandon(
    mut browser: Browser,
    handler: JoinHandle<()>,
    pumps: Vec<JoinHandle<()>>,
    profile_dir: &Path,
) {
    for pump in pumps {
        pump.abort();
    }
    if let Err(err) = browser.close().await {
        debug!("browser close after failed launch: {err}");
    }
    let _ = browser.wait().await;
    handler.abort();
    if let Err(err) = tokio::fs::remove_dir_all(profile_dir).await {
        trace!(path = %profile_dir.display(), "profile cleanup: {err}");
    }
}

fn browser_config(
    options: &PageOptions,
    launch: &LaunchOptions,
    profile_dir: &Path,
) -> Result<BrowserConfig> {
    let viewport = options.viewport_size;
    let mut builder = BrowserConfig::builder()
        .user_data_dir(profile_dir)
        .window_size(viewport.width, viewport.height)
        .request_timeout(launch.request_timeout)
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--disable-background-networking")
        .arg("--hide-scrollbars")
        .arg("--mute-audio");
    if let Some(executable) = &launch.executable {
        builder = builder.chrome_executable(executable);
    }
    if launch.no_sandbox {
        builder = builder.no_sandbox();
    }
    for flag in engine_flags(&options.settings) {
        builder = builder.arg(flag);
    }
    builder.build().map_err(WatchError::browser)
}

async fn prepare_page(browser: &Browser, options: &PageOptions) -> Result<Page> {
    let page = browser.new_page("about:blank").await?;
    page.execute(network::EnableParams::default()).await?;
    page.execute(cdp_page::EnableParams::default()).await?;
    page.execute(runtime::EnableParams::default()).await?;

    let viewport = options.viewport_size;
    let metrics = SetDeviceMetricsOverrideParams::builder()
        .width(viewport.width as i64)
        .height(viewport.height as i64)
        .device_scale_factor(options.zoom_factor)
        .mobile(false)
        .build()
        .map_err(WatchError::browser)?;
    page.execute(metrics).await?;

    if let Some(user_agent) = &options.settings.user_agent {
        page.execute(SetUserAgentOverrideParams::new(user_agent.clone()))
            .await?;
    }
    if !options.custom_headers.is_empty() {
        let headers = Headers::new(serde_json::to_value(&options.custom_headers)?);
        page.execute(SetExtraHttpHeadersParams::new(headers)).await?;
    }
    if !options.settings.javascript_enabled {
        page.execute(SetScriptExecutionDisabledParams::new(true))
            .await?;
    }

    page.execute(AddBindingParams::new(BRIDGE_BINDING)).await?;
    page.execute(AddScriptToEvaluateOnNewDocumentParams::new(bootstrap_script()))
        .await?;
    Ok(page)
}

/// The parts of CDP lifecycle and network events that drive idle detection.
#[derive(Debug, Clone, PartialEq)]
enum Lifecycle {
    Navigated {
        frame: FrameId,
        parent: Option<FrameId>,
        url: String,
        fragment: Option<String>,
    },
    StartedLoading {
        frame: FrameId,
    },
    LoadFired,
    Requested {
        request: String,
        redirect: bool,
    },
    Finished {
        request: String,
    },
    Failed {
        request: String,
        error: String,
    },
}

/// Maps one raw event onto the detector's vocabulary, or `None` when it
/// must not touch the counter. Tracks the main frame across navigations.
fn translate(raw: Lifecycle, main_frame: &mut Option<FrameId>) -> Option<PageEvent> {
    let event = match raw {
        Lifecycle::Navigated {
            frame,
            parent,
            url,
            fragment,
        } => {
            if parent.is_some() {
                return None;
            }
            *main_frame = Some(frame);
            let url = match fragment {
                Some(fragment) => url + &fragment,
                None => url,
            };
            PageEvent::Navigated { url }
        }
        Lifecycle::StartedLoading { frame } => {
            if main_frame.as_ref().is_some_and(|id| *id != frame) {
                return None;
            }
            PageEvent::LoadStarted
        }
        Lifecycle::LoadFired => PageEvent::LoadFinished(LoadStatus::Success),
        // A redirect hop reuses the request id of the original.
        Lifecycle::Requested { redirect: true, .. } => return None,
        Lifecycle::Requested { request, .. } => PageEvent::ResourceRequested { id: Some(request) },
        Lifecycle::Finished { request } => PageEvent::ResourceReceived { id: Some(request) },
        Lifecycle::Failed { request, error } => {
            trace!(request = %request, "request failed: {error}");
            PageEvent::ResourceTimeout { id: Some(request) }
        }
    };
    Some(event)
}

async fn spawn_lifecycle_pump(
    page: &Page,
    sender: mpsc::UnboundedSender<PageEvent>,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>> {
    let mut main_frame = page.mainframe().await?;
    let streams: Vec<BoxStream<'static, Lifecycle>> = vec![
        page.event_listener::<EventFrameNavigated>()
            .await?
            .map(|ev| Lifecycle::Navigated {
                frame: ev.frame.id.clone(),
                parent: ev.frame.parent_id.clone(),
                url: ev.frame.url.clone(),
                fragment: ev.frame.url_fragment.clone(),
            })
            .boxed(),
        page.event_listener::<EventFrameStartedLoading>()
            .await?
            .map(|ev| Lifecycle::StartedLoading {
                frame: ev.frame_id.clone(),
            })
            .boxed(),
        page.event_listener::<EventLoadEventFired>()
            .await?
            .map(|_| Lifecycle::LoadFired)
            .boxed(),
        page.event_listener::<EventRequestWillBeSent>()
            .await?
            .map(|ev| Lifecycle::Requested {
                request: ev.request_id.inner().clone(),
                redirect: ev.redirect_response.is_some(),
            })
            .boxed(),
        page.event_listener::<EventLoadingFinished>()
            .await?
            .map(|ev| Lifecycle::Finished {
                request: ev.request_id.inner().clone(),
            })
            .boxed(),
        page.event_listener::<EventLoadingFailed>()
            .await?
            .map(|ev| Lifecycle::Failed {
                request: ev.request_id.inner().clone(),
                error: ev.error_text.clone(),
            })
            .boxed(),
    ];
    let mut merged = stream::select_all(streams);

    Ok(tokio::spawn(async move {
        loop {
            let raw = tokio::select! {
                _ = cancel.cancelled() => break,
                raw = merged.next() => raw,
            };
            let Some(raw) = raw else { break };
            let Some(event) = translate(raw, &mut main_frame) else {
                continue;
            };
            if sender.send(event).is_err() {
                break;
            }
        }
    }))
}

async fn spawn_diagnostics_pump(
    page: &Page,
    token: RunToken,
    progress: Option<ProgressCallback>,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>> {
    let mut bindings = page.event_listener::<EventBindingCalled>().await?;
    let mut exceptions = page.event_listener::<EventExceptionThrown>().await?;

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(call) = bindings.next() => {
                    if call.name != BRIDGE_BINDING {
                        continue;
                    }
                    match bridge::accept(&token, &call.payload) {
                        Some(message) => log_progress(&progress, &message.render()),
                        None => trace!("dropped bridge message without run token"),
                    }
                }
                Some(thrown) = exceptions.next() => {
                    eprintln!("{}", error_report(&thrown.exception_details));
                }
                else => break,
            }
        }
    }))
}

/// Converts CDP exception details into a printable report.
pub fn error_report(details: &ExceptionDetails) -> PageErrorReport {
    let message = details
        .exception
        .as_ref()
        .and_then(|exception| exception.description.as_deref())
        .and_then(|description| description.lines().next())
        .unwrap_or(&details.text)
        .to_string();

    let trace = match &details.stack_trace {
        Some(stack) => stack
            .call_frames
            .iter()
            .map(|frame| TraceFrame {
                file: frame.url.clone(),
                line: frame.line_number + 1,
                function: Some(frame.function_name.clone()).filter(|name| !name.is_empty()),
            })
            .collect(),
        None => details
            .url
            .iter()
            .map(|url| TraceFrame {
                file: url.clone(),
                line: details.line_number + 1,
                function: None,
            })
            .collect(),
    };

    PageErrorReport { message, trace }
}
