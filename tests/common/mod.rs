//! In-memory collaborators for driving the connection core in tests.
#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use dappconnect::{
    connection::{
        AppContext, ConnectionMode, ContractBinder, ExecutionContext, IdentitySource,
        NetworkEndpoints, WalletResponse,
    },
    contract::ContractDescriptor,
    error::{AppError, AppResult},
    network::Network,
};
use ethers::types::Address;
use tokio::sync::oneshot;

pub const WAIT: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub struct TestSigner {
    pub name: &'static str,
}

#[derive(Debug)]
pub struct TestEndpoint {
    pub serial: usize,
}

#[derive(Debug)]
pub struct TestHandle {
    pub mode: ConnectionMode,
    pub signer: Option<&'static str>,
    pub endpoint_serial: Option<usize>,
}

pub type TestContext = AppContext<ScriptedSource, GatedBinder, CountingEndpoints>;

/// Read-only endpoints numbered in construction order.
#[derive(Default)]
pub struct CountingEndpoints {
    built: AtomicUsize,
}

impl CountingEndpoints {
    pub fn built(&self) -> usize {
        self.built.load(Ordering::SeqCst)
    }
}

impl NetworkEndpoints for CountingEndpoints {
    type Endpoint = TestEndpoint;

    fn read_only(&self, _network: Network) -> AppResult<TestEndpoint> {
        let serial = self.built.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TestEndpoint { serial })
    }
}

struct Gate {
    entered: oneshot::Sender<()>,
    release: oneshot::Receiver<()>,
}

/// Binder whose signed bindings can be held open per signer name.
#[derive(Default)]
pub struct GatedBinder {
    gates: Mutex<HashMap<&'static str, Gate>>,
    fail_next: AtomicBool,
}

impl GatedBinder {
    /// Hold the next signed binding for `signer` until the returned sender fires.
    /// The receiver resolves once the binding is parked at the gate.
    pub fn gate(&self, signer: &'static str) -> (oneshot::Receiver<()>, oneshot::Sender<()>) {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        self.gates.lock().unwrap().insert(
            signer,
            Gate {
                entered: entered_tx,
                release: release_rx,
            },
        );
        (entered_rx, release_tx)
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContractBinder for GatedBinder {
    type Signer = TestSigner;
    type Endpoint = TestEndpoint;
    type Handle = TestHandle;

    async fn bind(
        &self,
        _descriptor: &ContractDescriptor,
        context: &ExecutionContext<TestSigner, TestEndpoint>,
    ) -> AppResult<TestHandle> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(AppError::Binding("rejected by test binder".into()));
        }

        match context {
            ExecutionContext::Signed(signer) => {
                let gate = self.gates.lock().unwrap().remove(signer.name);
                if let Some(gate) = gate {
                    let _ = gate.entered.send(());
                    let _ = gate.release.await;
                }
                Ok(TestHandle {
                    mode: ConnectionMode::Signed,
                    signer: Some(signer.name),
                    endpoint_serial: None,
                })
            }
            ExecutionContext::ReadOnly(endpoint) => Ok(TestHandle {
                mode: ConnectionMode::ReadOnly,
                signer: None,
                endpoint_serial: Some(endpoint.serial),
            }),
        }
    }
}

/// Identity source replaying queued answers; an empty queue means "declined".
#[derive(Default)]
pub struct ScriptedSource {
    responses: Mutex<VecDeque<AppResult<WalletResponse<TestSigner>>>>,
    disconnects: AtomicUsize,
}

impl ScriptedSource {
    pub fn push(&self, response: AppResult<WalletResponse<TestSigner>>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn push_connected(&self, address: Address, signer: Arc<TestSigner>) {
        self.push(Ok(WalletResponse::connected(address, signer)));
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentitySource for ScriptedSource {
    type Signer = TestSigner;

    async fn connect(&self) -> AppResult<WalletResponse<TestSigner>> {
        let next = self.responses.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(WalletResponse::not_connected()))
    }

    async fn disconnect(&self) -> AppResult<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct Harness {
    pub source: Arc<ScriptedSource>,
    pub binder: Arc<GatedBinder>,
    pub endpoints: Arc<CountingEndpoints>,
    pub ctx: TestContext,
}

pub fn harness() -> Harness {
    let source = Arc::new(ScriptedSource::default());
    let binder = Arc::new(GatedBinder::default());
    let endpoints = Arc::new(CountingEndpoints::default());
    let descriptor = ContractDescriptor::from_json(
        r#"[{"type":"function","name":"getCount","inputs":[],"outputs":[{"name":"","type":"uint256"}],"stateMutability":"view"}]"#,
        Address::from_low_u64_be(0xc0),
    )
    .expect("test ABI parses");

    let ctx = AppContext::new(
        source.clone(),
        binder.clone(),
        endpoints.clone(),
        Arc::new(descriptor),
        Network::Sepolia,
    );

    Harness {
        source,
        binder,
        endpoints,
        ctx,
    }
}

pub fn signer(name: &'static str) -> Arc<TestSigner> {
    Arc::new(TestSigner { name })
}
