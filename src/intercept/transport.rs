//! Transport that routes outbound calls into the replay engine

use std::sync::Arc;

use tracing::debug;

use super::{OutboundRequest, Transport, TransportResponse};
use crate::fingerprint::Params;
use crate::origin::Origin;
use crate::replay::{Call, ReplayEngine};
use crate::Result;

/// [`Transport`] backed by a [`ReplayEngine`]
///
/// A missing fixture comes back as a response with
/// [`ABSENT_STATUS`](crate::replay::ABSENT_STATUS), origin and storage
/// failures as errors.
pub struct ReplayTransport<O> {
    engine: Arc<ReplayEngine<O>>,
}

impl<O> ReplayTransport<O> {
    /// Wrap a shared engine
    #[must_use]
    pub fn new(engine: Arc<ReplayEngine<O>>) -> Self {
        Self { engine }
    }

    /// Engine answering the calls
    #[must_use]
    pub fn engine(&self) -> &Arc<ReplayEngine<O>> {
        &self.engine
    }
}

impl<O> Clone for ReplayTransport<O> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<O: Origin> Transport for ReplayTransport<O> {
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse> {
        let call = to_call(&request)?;
        debug!("Intercepted {} {}", call.method, call.full_url());

        let response = self.engine.handle(&call).await?;

        Ok(TransportResponse {
            status: response.status,
            url: call.full_url(),
            content_type: response.content_type,
            body: response.body,
        })
    }
}

/// Build the engine call: URL query and extra params are both query
/// parameters, extra params winning on collision
///
/// A `None` param is absent, so it never shadows a value from the URL.
fn to_call(request: &OutboundRequest) -> Result<Call> {
    let call = Call::from_url(&request.method, &request.url)?;

    let mut query = call.query.clone();
    for (key, value) in &request.params {
        if let Some(value) = value {
            query.insert(key.clone(), Some(value.clone()));
        }
    }

    let form: Params = request.form.iter().cloned().collect();

    Ok(call.with_query(query).with_form(form))
}
