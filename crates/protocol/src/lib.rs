//! Wire types for the Chrome DevTools Protocol subset spoken by pagewatch.
//!
//! Nothing in this crate performs I/O. It describes:
//!
//! - [`message`] - JSON-RPC envelopes (commands, responses, events)
//! - [`events`] - typed parameters of the page events the capture engine consumes
//! - [`remote`] - `Runtime.RemoteObject` values carried by console events
//! - [`target`] - targets (tabs) and the `/json/version` discovery document
//! - [`cookie`] - cookies returned by `Network.getCookies`
//! - [`screenshot`] - `Page.captureScreenshot` payloads

pub mod cookie;
pub mod events;
pub mod message;
pub mod remote;
pub mod screenshot;
pub mod target;

pub use cookie::{Cookie, CookieList, SameSite};
pub use events::{
	ConsoleApiCalled, ExceptionDetails, ExceptionThrown, LoadingFailed, LoadingFinished, NetworkRequest, NetworkResponse, PageEvent, RequestWillBeSent,
	ResponseBody, ResponseReceived, TargetCreated, TargetDestroyed,
};
pub use message::{CdpCommand, CdpEvent, CdpResponse, IncomingMessage, RemoteError};
pub use remote::RemoteObject;
pub use screenshot::Screenshot;
pub use target::{TargetInfo, VersionInfo};
