use actix::{
    Actor, ActorContext, ActorFutureExt, Addr, AsyncContext, Handler, Message as ActixMessage,
    StreamHandler, WrapFuture,
};
use actix::prelude::SendError;
use actix_web_actors::ws;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{Connection, ConnectionError, ConnectionId, ConnectionRegistry, Dispatcher, OutboundFrame};

/// Text frame queued for the client.
#[derive(ActixMessage)]
#[rtype(result = "()")]
struct Push(String);

#[derive(ActixMessage)]
#[rtype(result = "()")]
struct Shutdown;

/// Registry-facing handle of a running [`WsSession`].
///
/// Writes never block: they go into the actor's bounded mailbox, and a full
/// mailbox counts as a failed write.
struct SessionHandle {
    id: ConnectionId,
    addr: Addr<WsSession>,
}

#[async_trait]
impl Connection for SessionHandle {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn send_text(&self, text: String) -> Result<(), ConnectionError> {
        self.addr.try_send(Push(text)).map_err(|e| match e {
            SendError::Full(_) => ConnectionError::Backpressure,
            SendError::Closed(_) => ConnectionError::Closed,
        })
    }

    async fn close(&self) {
        if self.addr.connected() {
            self.addr.do_send(Shutdown);
        }
    }
}

/// One websocket client, bound to an authenticated identity.
pub struct WsSession {
    id: ConnectionId,
    identity: String,
    registry: ConnectionRegistry,
    dispatcher: Dispatcher,
    mailbox_capacity: usize,
}

impl WsSession {
    pub fn new(
        identity: String,
        registry: ConnectionRegistry,
        dispatcher: Dispatcher,
        mailbox_capacity: usize,
    ) -> Self {
        Self {
            id: ConnectionId::new(),
            identity,
            registry,
            dispatcher,
            mailbox_capacity,
        }
    }

    fn reply(&self, frame: OutboundFrame, ctx: &mut ws::WebsocketContext<Self>) {
        match frame.to_json() {
            Ok(text) => ctx.text(text),
            Err(e) => warn!(connection_id = %self.id, error = %e, "couldn't encode reply"),
        }
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        ctx.set_mailbox_capacity(self.mailbox_capacity);

        let handle = Arc::new(SessionHandle {
            id: self.id,
            addr: ctx.address(),
        });
        let registry = self.registry.clone();
        let identity = self.identity.clone();

        // Frames are not read until registration finished.
        ctx.wait(
            async move { registry.register(handle, identity).await }
                .into_actor(self)
                .map(|evicted, act, _ctx| {
                    info!(connection_id = %act.id, identity = %act.identity, "websocket session started");
                    if let Some(old) = evicted {
                        info!(
                            identity = %act.identity,
                            evicted = %old.id,
                            "closing older connection of the same identity"
                        );
                        actix::spawn(async move { old.connection.close().await });
                    }
                }),
        );
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(connection_id = %self.id, identity = %self.identity, "websocket session stopped");

        let registry = self.registry.clone();
        let id = self.id;
        actix::spawn(async move {
            registry.unregister(id).await;
        });
    }
}

impl Handler<Push> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: Push, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl Handler<Shutdown> for WsSession {
    type Result = ();

    fn handle(&mut self, _: Shutdown, ctx: &mut Self::Context) {
        ctx.close(Some(ws::CloseCode::Away.into()));
        ctx.stop();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                let dispatcher = self.dispatcher.clone();
                let identity = self.identity.clone();
                let text = text.to_string();

                // Waiting keeps frames of this connection strictly ordered.
                ctx.wait(
                    async move { dispatcher.handle_text(&identity, &text).await }
                        .into_actor(self)
                        .map(|reply, act, ctx| {
                            if let Some(frame) = reply {
                                act.reply(frame, ctx);
                            }
                        }),
                );
            }
            Ok(ws::Message::Ping(bytes)) => ctx.pong(&bytes),
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Binary(_)) => {
                self.reply(
                    OutboundFrame::error("bad_request", "binary frames are not supported"),
                    ctx,
                );
            }
            Ok(ws::Message::Close(reason)) => {
                debug!(connection_id = %self.id, ?reason, "close frame received");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(e) => {
                warn!(connection_id = %self.id, error = %e, "websocket read error");
                ctx.stop();
            }
        }
    }
}
