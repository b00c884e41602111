pub mod body;
pub mod item;
pub mod mocker;
pub mod persistence;
pub(crate) mod remote;

pub use body::{BodyContext, BodyError, BodyResult, MockBody, MockPayload};
pub use item::{Bypass, MockItem, MockItemInfo, MockUrl};
pub use mocker::{Mocker, ProxyCommand, PROXY_MESSAGE_PREFIX};
pub use remote::RemoteInfo;
