use std::fmt::{Debug, Formatter};
use tokio::sync::{mpsc, oneshot};

use crate::common::error::FleetError;

/// Can be used to respond to a RPC call.
#[must_use = "response token should be used to respond to a request"]
pub struct ResponseToken<T> {
    sender: oneshot::Sender<T>,
}

impl<T> Debug for ResponseToken<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("Response token")
    }
}

impl<T> ResponseToken<T> {
    pub fn respond(self, response: T) {
        if self.sender.send(response).is_err() {
            log::warn!("Could not send response to RPC method, the other end hang up");
        }
    }
}

/// Sends the message built by `make_request` into `sender` and waits until the receiving side
/// resolves the response token that was put inside the message.
///
/// Fails with [`FleetError::ServiceStopped`] if the receiving side is gone, either before the
/// message was delivered or before it was answered.
pub async fn request<M, Response, F>(
    sender: &RpcSender<M>,
    make_request: F,
) -> crate::Result<Response>
where
    F: FnOnce(ResponseToken<Response>) -> M,
{
    let (tx, rx) = oneshot::channel::<Response>();
    let token = ResponseToken { sender: tx };
    if sender.send(make_request(token)).is_err() {
        log::warn!("Could not make RPC request, the receiver is closed");
        return Err(FleetError::ServiceStopped);
    }
    rx.await.map_err(|_| FleetError::ServiceStopped)
}

pub type RpcSender<T> = mpsc::UnboundedSender<T>;
pub type RpcReceiver<T> = mpsc::UnboundedReceiver<T>;

pub fn make_rpc_queue<T>() -> (RpcSender<T>, RpcReceiver<T>) {
    mpsc::unbounded_channel()
}
