use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, InsertTextParams,
};
use chromiumoxide::cdp::browser_protocol::network::{
    Cookie, CookieParam, CookieSameSite, TimeSinceEpoch,
};
use chromiumoxide::cdp::browser_protocol::page::{EventFrameNavigated, FrameId as CdpFrameId};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;

use super::{Driver, DriverError, ElementHandle, FrameId, Probe};
use crate::types::SessionCookie;

const HEADLESS_VIEWPORT: (u32, u32) = (1280, 720);

impl From<CdpError> for DriverError {
    fn from(e: CdpError) -> Self {
        DriverError::Protocol(e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub headless: bool,
    pub executable: Option<PathBuf>,
    pub typing_delay: Duration,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
            typing_delay: Duration::from_millis(50),
        }
    }
}

pub struct ChromiumDriver {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    typing_delay: Duration,
}

impl ChromiumDriver {
    pub async fn launch(options: LaunchOptions) -> Result<Self, DriverError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-setuid-sandbox");

        builder = if options.headless {
            builder.viewport(Viewport {
                width: HEADLESS_VIEWPORT.0,
                height: HEADLESS_VIEWPORT.1,
                ..Default::default()
            })
        } else {
            builder.with_head().viewport(None::<Viewport>)
        };

        if let Some(path) = &options.executable {
            builder = builder.chrome_executable(path);
        }

        let config = builder.build().map_err(DriverError::Launch)?;

        log::info!(
            "Launching browser in {} mode",
            if options.headless { "headless" } else { "visible" }
        );

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| DriverError::Launch(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    log::debug!("Browser handler event error: {}", e);
                }
            }
        });

        let page = browser.new_page("about:blank").await?;

        Ok(Self {
            browser,
            page,
            handler,
            typing_delay: options.typing_delay,
        })
    }

    pub async fn close(mut self) -> Result<(), DriverError> {
        self.browser.close().await?;
        let _ = self.browser.wait().await;
        self.handler.abort();
        Ok(())
    }

    async fn evaluate_in<T: DeserializeOwned>(
        &self,
        frame: &FrameId,
        expression: String,
    ) -> Result<T, DriverError> {
        let mut params = EvaluateParams::builder()
            .expression(expression)
            .return_by_value(true)
            .await_promise(true);

        let main = self.page.mainframe().await?;
        if main.as_ref().map(|id| id.inner().as_str()) != Some(frame.as_str()) {
            let context = self
                .page
                .frame_execution_context(CdpFrameId::new(frame.as_str()))
                .await?
                .ok_or_else(|| {
                    DriverError::Protocol(format!(
                        "frame {} has no execution context",
                        frame.as_str()
                    ))
                })?;
            params = params.context_id(context);
        }

        let params = params.build().map_err(DriverError::Script)?;
        self.page
            .evaluate_expression(params)
            .await?
            .into_value()
            .map_err(|e| DriverError::Script(e.to_string()))
    }

    async fn evaluate_main<T: DeserializeOwned>(&self, expression: String) -> Result<T, DriverError> {
        self.page
            .evaluate(expression)
            .await?
            .into_value()
            .map_err(|e| DriverError::Script(e.to_string()))
    }

    async fn element_script(
        &self,
        element: &ElementHandle,
        body: &str,
    ) -> Result<(), DriverError> {
        let found: bool = self
            .evaluate_in(
                &element.frame,
                format!(
                    "((selector) => {{ const el = document.querySelector(selector); if (!el) return false; {} return true; }})({})",
                    body,
                    js_string(&element.selector)
                ),
            )
            .await?;

        if found {
            Ok(())
        } else {
            Err(DriverError::Script(format!(
                "element {} detached before use",
                element.selector
            )))
        }
    }
}

fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

const PROBE_SCRIPT: &str = r#"((selector) => {
  const el = document.querySelector(selector);
  if (!el || !el.ownerDocument || !el.isConnected) return "missing";
  const style = window.getComputedStyle(el);
  const rect = el.getBoundingClientRect();
  const visible = style
    && style.visibility !== "hidden"
    && style.display !== "none"
    && rect.width > 0
    && rect.height > 0;
  return visible ? "visible" : "hidden";
})"#;

fn to_session_cookie(cookie: Cookie) -> SessionCookie {
    SessionCookie {
        name: cookie.name,
        value: cookie.value,
        domain: cookie.domain,
        path: cookie.path,
        expires: (!cookie.session && cookie.expires > 0.0).then_some(cookie.expires),
        http_only: cookie.http_only,
        secure: cookie.secure,
        same_site: cookie.same_site.map(|s| s.as_ref().to_string()),
    }
}

fn to_cookie_param(cookie: &SessionCookie) -> Result<CookieParam, DriverError> {
    let mut builder = CookieParam::builder()
        .name(cookie.name.clone())
        .value(cookie.value.clone())
        .domain(cookie.domain.clone())
        .path(cookie.path.clone())
        .http_only(cookie.http_only)
        .secure(cookie.secure);

    if let Some(expires) = cookie.expires {
        builder = builder.expires(TimeSinceEpoch::new(expires));
    }
    if let Some(same_site) = cookie
        .same_site
        .as_deref()
        .and_then(|s| s.parse::<CookieSameSite>().ok())
    {
        builder = builder.same_site(same_site);
    }

    builder.build().map_err(DriverError::Protocol)
}

#[async_trait]
impl Driver for ChromiumDriver {
    async fn goto(&self, url: &str) -> Result<(), DriverError> {
        self.page.goto(url).await?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    async fn content(&self) -> Result<String, DriverError> {
        Ok(self.page.content().await?)
    }

    async fn frames(&self) -> Result<Vec<FrameId>, DriverError> {
        let main = self.page.mainframe().await?;
        let mut frames: Vec<FrameId> = Vec::new();
        if let Some(main) = &main {
            frames.push(FrameId::new(main.inner().clone()));
        }
        for frame in self.page.frames().await? {
            if Some(&frame) != main.as_ref() {
                frames.push(FrameId::new(frame.inner().clone()));
            }
        }
        Ok(frames)
    }

    async fn probe(&self, frame: &FrameId, selector: &str) -> Result<Probe, DriverError> {
        let state: String = self
            .evaluate_in(frame, format!("{}({})", PROBE_SCRIPT, js_string(selector)))
            .await?;
        Ok(match state.as_str() {
            "visible" => Probe::Visible,
            "hidden" => Probe::Hidden,
            _ => Probe::Missing,
        })
    }

    async fn fill(&self, element: &ElementHandle, text: &str) -> Result<(), DriverError> {
        self.element_script(
            element,
            "el.focus(); if (typeof el.select === 'function') el.select(); el.value = ''; el.dispatchEvent(new Event('input', { bubbles: true }));",
        )
        .await?;

        for ch in text.chars() {
            self.page
                .execute(InsertTextParams::new(ch.to_string()))
                .await?;
            tokio::time::sleep(self.typing_delay).await;
        }
        Ok(())
    }

    async fn scroll_into_view(&self, element: &ElementHandle) -> Result<(), DriverError> {
        self.element_script(
            element,
            "try { el.scrollIntoView({ behavior: 'instant', block: 'center', inline: 'center' }); } catch (e) {}",
        )
        .await
    }

    async fn click(&self, element: &ElementHandle) -> Result<(), DriverError> {
        self.element_script(element, "el.click();").await
    }

    async fn wait_for_navigation(&self) -> Result<(), DriverError> {
        // Page::wait_for_navigation resolves at once on an already loaded frame,
        // so listen for the next main-frame commit instead.
        let mut navigated = self.page.event_listener::<EventFrameNavigated>().await?;
        while let Some(event) = navigated.next().await {
            if event.frame.parent_id.is_none() {
                log::debug!("Main frame navigated to {}", event.frame.url);
                return Ok(());
            }
        }
        Err(DriverError::Protocol(
            "navigation event stream closed".to_string(),
        ))
    }

    async fn dispatch_click(&self, selector: &str) -> Result<bool, DriverError> {
        self.evaluate_main(format!(
            "((selector) => {{ const link = document.querySelector(selector); if (!link) return false; link.dispatchEvent(new MouseEvent('click', {{ bubbles: true, cancelable: true }})); return true; }})({})",
            js_string(selector)
        ))
        .await
    }

    async fn click_by_text(&self, selector: &str, text: &str) -> Result<bool, DriverError> {
        self.evaluate_main(format!(
            "((selector, text) => {{ const el = Array.from(document.querySelectorAll(selector)).find((a) => (a.textContent || '').trim() === text); if (!el) return false; el.click(); return true; }})({}, {})",
            js_string(selector),
            js_string(text)
        ))
        .await
    }

    async fn read_text(&self, selector: &str) -> Result<Option<String>, DriverError> {
        let text: Option<String> = self
            .evaluate_main(format!(
                "((selector) => {{ const el = document.querySelector(selector); return el ? (el.textContent || '') : null; }})({})",
                js_string(selector)
            ))
            .await?;
        Ok(text
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty()))
    }

    async fn press_escape(&self) -> Result<(), DriverError> {
        for kind in [DispatchKeyEventType::KeyDown, DispatchKeyEventType::KeyUp] {
            let params = DispatchKeyEventParams::builder()
                .r#type(kind)
                .key("Escape")
                .code("Escape")
                .windows_virtual_key_code(27)
                .native_virtual_key_code(27)
                .build()
                .map_err(DriverError::Protocol)?;
            self.page.execute(params).await?;
        }
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<SessionCookie>, DriverError> {
        Ok(self
            .page
            .get_cookies()
            .await?
            .into_iter()
            .map(to_session_cookie)
            .collect())
    }

    async fn set_cookies(&self, cookies: &[SessionCookie]) -> Result<(), DriverError> {
        let params = cookies
            .iter()
            .map(to_cookie_param)
            .collect::<Result<Vec<_>, _>>()?;
        self.page.set_cookies(params).await?;
        Ok(())
    }
}
