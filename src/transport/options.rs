//! Construction-time configuration.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use wallet_transport::transport::{PopupFeatures, WindowOptions};
//!
//! let options = WindowOptions::popup("https://wallet.example/connect")?
//!     .with_features(PopupFeatures::new().with_size(420, 640))
//!     .with_timeout(Duration::from_secs(10));
//!
//! assert_eq!(options.target_origin(), "https://wallet.example");
//! # Ok::<(), wallet_transport::TransportError>(())
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use url::Url;

use crate::error::{Result, TransportError};

use super::window::WindowHandle;

// ============================================================================
// Constants
// ============================================================================

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default cap on outstanding requests.
pub const DEFAULT_MAX_PENDING: usize = 100;

/// Default liveness-probe timeout for window targets.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default interval for checking whether the target window closed.
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_millis(500);

/// Default popup name passed to the window provider.
pub const DEFAULT_POPUP_NAME: &str = "wallet_popup";

// ============================================================================
// TransportOptions
// ============================================================================

/// Options shared by every transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportOptions {
    /// Time to wait for a correlated reply.
    pub timeout: Duration,

    /// Maximum outstanding requests before `send()` fails.
    pub max_pending: usize,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_pending: DEFAULT_MAX_PENDING,
        }
    }

    /// Sets the per-request timeout.
    #[inline]
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the outstanding-request cap.
    #[inline]
    #[must_use]
    pub const fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }
}

// ============================================================================
// Origins
// ============================================================================

/// Normalizes `input` to an exact `scheme://host[:port]` origin.
///
/// # Errors
///
/// Returns `transport_error` for `"*"`, unparsable input, or opaque
/// origins such as `data:` URLs.
pub fn normalize_origin(input: &str) -> Result<String> {
    if input.trim() == "*" {
        return Err(TransportError::transport(
            "Wildcard target origin is not allowed",
        ));
    }

    let url = Url::parse(input).map_err(|e| {
        TransportError::transport(format!("Invalid target origin '{input}'")).with_cause(e)
    })?;

    let origin = url.origin();
    if !origin.is_tuple() {
        return Err(TransportError::transport(format!(
            "Target origin '{input}' is opaque"
        )));
    }

    Ok(origin.ascii_serialization())
}

// ============================================================================
// PopupFeatures
// ============================================================================

/// Popup window name and geometry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopupFeatures {
    /// Window name (reused popups share a name).
    pub name: String,

    /// Width in pixels.
    pub width: u32,

    /// Height in pixels.
    pub height: u32,

    /// Screen position (left, top), if any.
    pub position: Option<(i32, i32)>,
}

impl Default for PopupFeatures {
    fn default() -> Self {
        Self::new()
    }
}

impl PopupFeatures {
    /// Creates features with a 400x600 unpositioned popup.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: DEFAULT_POPUP_NAME.to_string(),
            width: 400,
            height: 600,
            position: None,
        }
    }

    /// Sets the window name.
    #[inline]
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the window size in pixels.
    #[inline]
    #[must_use]
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Sets the screen position.
    #[inline]
    #[must_use]
    pub fn with_position(mut self, left: i32, top: i32) -> Self {
        self.position = Some((left, top));
        self
    }

    /// Renders the `window.open` feature string.
    #[must_use]
    pub fn to_feature_string(&self) -> String {
        let mut features = format!("width={},height={}", self.width, self.height);
        if let Some((left, top)) = self.position {
            features.push_str(&format!(",left={left},top={top}"));
        }
        features
    }
}

// ============================================================================
// WindowOptions
// ============================================================================

/// What the window transport talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowTarget {
    /// Open a popup at `url`.
    Popup {
        /// Wallet page URL.
        url: Url,
        /// Popup name and geometry.
        features: PopupFeatures,
    },
    /// Use an already open window or iframe.
    Existing(WindowHandle),
}

/// Window transport configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowOptions {
    target: WindowTarget,
    target_origin: String,
    connect_timeout: Duration,
    watch_interval: Duration,
    transport: TransportOptions,
}

impl WindowOptions {
    /// Targets a popup opened at `url`; the origin is derived from it.
    ///
    /// # Errors
    ///
    /// Returns `transport_error` if `url` is not a valid tuple-origin URL.
    pub fn popup(url: &str) -> Result<Self> {
        let target_origin = normalize_origin(url)?;
        let url = Url::parse(url).map_err(|e| {
            TransportError::transport(format!("Invalid popup URL '{url}'")).with_cause(e)
        })?;

        Ok(Self::with_target(
            WindowTarget::Popup {
                url,
                features: PopupFeatures::new(),
            },
            target_origin,
        ))
    }

    /// Targets an existing window or iframe served from `target_origin`.
    ///
    /// # Errors
    ///
    /// Returns `transport_error` if `target_origin` is `"*"` or invalid.
    pub fn existing(window: WindowHandle, target_origin: &str) -> Result<Self> {
        let target_origin = normalize_origin(target_origin)?;
        Ok(Self::with_target(WindowTarget::Existing(window), target_origin))
    }

    fn with_target(target: WindowTarget, target_origin: String) -> Self {
        Self {
            target,
            target_origin,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            watch_interval: DEFAULT_WATCH_INTERVAL,
            transport: TransportOptions::new(),
        }
    }

    /// Replaces the popup features. Ignored for existing windows.
    #[must_use]
    pub fn with_features(mut self, new_features: PopupFeatures) -> Self {
        if let WindowTarget::Popup { features, .. } = &mut self.target {
            *features = new_features;
        }
        self
    }

    /// Overrides the target origin.
    ///
    /// # Errors
    ///
    /// Returns `transport_error` if `origin` is `"*"` or invalid.
    pub fn with_target_origin(mut self, origin: &str) -> Result<Self> {
        self.target_origin = normalize_origin(origin)?;
        Ok(self)
    }

    /// Sets the liveness-probe timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets how often the target window is checked for closure.
    #[inline]
    #[must_use]
    pub fn with_watch_interval(mut self, interval: Duration) -> Self {
        self.watch_interval = interval;
        self
    }

    /// Sets the per-request timeout.
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.transport = self.transport.with_timeout(timeout);
        self
    }

    /// Replaces the shared transport options.
    #[inline]
    #[must_use]
    pub fn with_transport_options(mut self, transport: TransportOptions) -> Self {
        self.transport = transport;
        self
    }

    /// Returns the target.
    #[inline]
    #[must_use]
    pub fn target(&self) -> &WindowTarget {
        &self.target
    }

    /// Returns the exact origin used for posting and filtering.
    #[inline]
    #[must_use]
    pub fn target_origin(&self) -> &str {
        &self.target_origin
    }

    /// Returns the liveness-probe timeout.
    #[inline]
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns the window watch interval.
    #[inline]
    #[must_use]
    pub fn watch_interval(&self) -> Duration {
        self.watch_interval
    }

    /// Returns the shared transport options.
    #[inline]
    #[must_use]
    pub fn transport(&self) -> TransportOptions {
        self.transport
    }
}

// ============================================================================
// ExtensionOptions
// ============================================================================

/// Extension transport configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionOptions {
    extension_id: String,
    transport: TransportOptions,
}

impl ExtensionOptions {
    /// Targets the extension with `extension_id`.
    ///
    /// # Errors
    ///
    /// Returns `transport_error` if `extension_id` is blank.
    pub fn new(extension_id: impl Into<String>) -> Result<Self> {
        let extension_id = extension_id.into();
        if extension_id.trim().is_empty() {
            return Err(TransportError::transport("Extension id must not be empty"));
        }
        Ok(Self {
            extension_id,
            transport: TransportOptions::new(),
        })
    }

    /// Sets the per-request timeout.
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.transport = self.transport.with_timeout(timeout);
        self
    }

    /// Replaces the shared transport options.
    #[inline]
    #[must_use]
    pub fn with_transport_options(mut self, transport: TransportOptions) -> Self {
        self.transport = transport;
        self
    }

    /// Returns the extension id.
    #[inline]
    #[must_use]
    pub fn extension_id(&self) -> &str {
        &self.extension_id
    }

    /// Returns the shared transport options.
    #[inline]
    #[must_use]
    pub fn transport(&self) -> TransportOptions {
        self.transport
    }
}

// ============================================================================
// Tests
// ============================================================================
