//! Checkout demo: a socket read, a fan-out, a pooled charge raced against a
//! timeout and a delayed finally notification ending in a socket write, all
//! in one chain.
//!
//! Run with: cargo run --example chain_demo

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::runtime::Handle;
use topdown_chain::{
    Chain, Collaborators, Completion, Executor, FanOut, Failure, FullStage, Interruptible, Join,
    JoinSlot, Outcome, Redirect, Redirector, Returned, SimpleStage, StageResult, StageTimeout,
    StrategyConfig, TracingLog,
};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, Error)]
enum ShopError {
    #[error("Item unavailable: {0}")]
    Unavailable(String),
}

// ============================================================================
// Fan-out: reserve every item in parallel
// ============================================================================

struct ReserveItems {
    items: Vec<String>,
    reserved: Mutex<Vec<String>>,
    pool: Arc<dyn Executor>,
}

impl FanOut for ReserveItems {
    fn instance_pool(&self, _instance: usize) -> Option<Arc<dyn Executor>> {
        Some(Arc::clone(&self.pool))
    }

    fn run_instance(&self, instance: usize, slot: JoinSlot) -> Result<bool, Failure> {
        let item = &self.items[instance];
        thread::sleep(Duration::from_millis(20));
        if item == "unicorn" {
            println!("  [Reserve] {item}: out of stock");
            return Err(Failure::declared(ShopError::Unavailable(item.clone())));
        }
        println!("  [Reserve] {item}: reserved");
        self.reserved.lock().push(item.clone());
        slot.completed().map_err(Failure::from)?;
        Ok(false)
    }
}

// ============================================================================
// Stages
// ============================================================================

/// Charges the card; slow when the gateway is congested.
struct Charge {
    amount: u32,
    congested: bool,
    cancelled: Arc<AtomicBool>,
}

struct Abort(Arc<AtomicBool>);

impl Interruptible for Abort {
    fn interrupt_and_rollback_asynchronously(&self) {
        println!("  [Charge] interrupted, voiding authorization");
        self.0.store(true, Ordering::SeqCst);
    }
}

impl SimpleStage for Charge {
    type Output = String;

    fn invoke(&self, _chain: &mut Chain) -> StageResult<String> {
        let delay = if self.congested { 300 } else { 30 };
        thread::sleep(Duration::from_millis(delay));
        println!("  [Charge] charged {} cents", self.amount);
        Ok(format!("PAY-{}", self.amount))
    }

    fn interrupt_handle(&self) -> Option<Arc<dyn Interruptible>> {
        Some(Arc::new(Abort(Arc::clone(&self.cancelled))))
    }
}

/// Runs after the reservation join; bounds the charge with a timeout.
struct Pay {
    amount: u32,
    congested: bool,
    reservation: Redirector<Join<ReserveItems>>,
    collaborators: Collaborators,
}

impl SimpleStage for Pay {
    type Output = String;

    fn invoke(&self, chain: &mut Chain) -> StageResult<String> {
        println!(
            "  [Pay] {} items reserved, charging",
            self.reservation.reserved.lock().len()
        );
        let strategy = StrategyConfig::timeout(
            "charge",
            Duration::from_millis(100),
            StrategyConfig::Pool,
        );
        chain.set_redirector(&strategy.build(&self.collaborators))?;
        chain.call(Charge {
            amount: self.amount,
            congested: self.congested,
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }
}

/// Void finally stage: always tells the customer what happened, then waits
/// for the receipt to be written.
struct Notify {
    message: String,
    pool: Arc<dyn Executor>,
}

impl SimpleStage for Notify {
    type Output = ();

    fn invoke(&self, chain: &mut Chain) -> StageResult<()> {
        println!("  [Notify] {}", self.message);
        let write = Redirector::new(ReceiptWrite {
            line: format!("{}\n", self.message),
            pool: Arc::clone(&self.pool),
        });
        chain.redirect_and_close(&write)
    }
}

/// Simulated socket write: the bytes are flushed on an executor thread.
struct ReceiptWrite {
    line: String,
    pool: Arc<dyn Executor>,
}

impl Redirect for ReceiptWrite {
    fn launch(&self, completion: Completion) {
        let line = self.line.clone();
        self.pool.execute(Box::new(move || {
            thread::sleep(Duration::from_millis(10));
            println!("  [Receipt] wrote {} bytes", line.len());
            if let Err(violation) = completion.completed() {
                eprintln!("  [Receipt] {violation}");
            }
        }));
    }
}

/// Reserves whatever the cart read returned, then pays.
struct ReserveCart {
    cart: Redirector<CartRead>,
    amount: u32,
    congested: bool,
    pool: Arc<dyn Executor>,
    collaborators: Collaborators,
}

impl SimpleStage for ReserveCart {
    type Output = String;

    fn invoke(&self, chain: &mut Chain) -> StageResult<String> {
        let items = self.cart.items.lock().clone();
        println!("  [Cart] read {} items", items.len());
        let reservation = Join::redirector(
            items.len(),
            ReserveItems {
                items,
                reserved: Mutex::new(Vec::new()),
                pool: Arc::clone(&self.pool),
            },
        );
        chain.set_redirector(&reservation)?;
        chain.call(Pay {
            amount: self.amount,
            congested: self.congested,
            reservation: reservation.clone(),
            collaborators: self.collaborators.clone(),
        })
    }
}

/// Simulated socket read: the cart arrives later on a runtime task.
struct CartRead {
    wire: Vec<String>,
    items: Arc<Mutex<Vec<String>>>,
    handle: Handle,
}

impl Redirect for CartRead {
    fn launch(&self, completion: Completion) {
        println!("  [Cart] waiting for the cart to arrive");
        let wire = self.wire.clone();
        let items = Arc::clone(&self.items);
        drop(self.handle.spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            items.lock().extend(wire);
            match tokio::task::spawn_blocking(move || completion.completed()).await {
                Ok(Err(violation)) => eprintln!("  [Cart] {violation}"),
                Err(error) => eprintln!("  [Cart] completion task failed: {error}"),
                Ok(Ok(())) => {}
            }
        }));
    }
}

/// Read the cart, reserve, pay, then notify whatever happened.
struct Checkout {
    items: Vec<String>,
    amount: u32,
    congested: bool,
    handle: Handle,
    collaborators: Collaborators,
}

impl FullStage for Checkout {
    type Body = String;
    type Output = String;

    fn body(&self, chain: &mut Chain) -> StageResult<String> {
        let cart = Redirector::new(CartRead {
            wire: self.items.clone(),
            items: Arc::new(Mutex::new(Vec::new())),
            handle: self.handle.clone(),
        });
        chain.set_redirector(&cart)?;
        chain.call(ReserveCart {
            cart: cart.clone(),
            amount: self.amount,
            congested: self.congested,
            pool: Arc::new(self.handle.clone()),
            collaborators: self.collaborators.clone(),
        })
    }

    fn invoke(&self, body: Result<String, Failure>, chain: &mut Chain) -> StageResult<String> {
        let message = match &body {
            Ok(payment) => format!("order paid with {payment}"),
            Err(failure) if failure.is::<StageTimeout>() => "payment timed out".to_string(),
            Err(failure) => format!("order failed: {failure}"),
        };
        let delay = StrategyConfig::delay(50).build(&self.collaborators);
        chain.set_redirector(&delay)?;
        chain.call_finally(Notify {
            message,
            pool: Arc::new(self.handle.clone()),
        })?;
        Ok(body?)
    }
}

// ============================================================================
// Driver
// ============================================================================

async fn checkout(name: &str, items: &[&str], congested: bool, handle: &Handle) {
    println!("\n=== {name} ===");
    let (tx, rx) = tokio::sync::oneshot::channel::<Outcome>();
    let stage = Checkout {
        items: items.iter().map(|s| s.to_string()).collect(),
        amount: 4_200,
        congested,
        handle: handle.clone(),
        collaborators: Collaborators::tokio(handle.clone()),
    };
    let id = Chain::start_with_outcome(
        move |chain| chain.call(stage).map(|_| ()),
        move |outcome| {
            let _ = tx.send(outcome);
        },
        Arc::new(TracingLog),
    );
    println!("  chain {id} suspended, waiting");

    match rx.await {
        Ok(Ok(Returned::Value(value))) => match value.downcast::<String>() {
            Ok(payment) => println!("  => SUCCESS: {payment}"),
            Err(_) => println!("  => SUCCESS"),
        },
        Ok(Ok(Returned::Void)) => println!("  => SUCCESS"),
        Ok(Err(failure)) => println!("  => FAILED: {failure}"),
        Err(_) => println!("  => chain dropped its listener"),
    }
}

#[tokio::main]
async fn main() {
    let handle = Handle::current();

    checkout("Happy path", &["book", "lamp", "mug"], false, &handle).await;
    checkout("Out of stock", &["book", "unicorn"], false, &handle).await;
    checkout("Payment timeout", &["book"], true, &handle).await;

    // Let the interrupted charge finish in the background before exiting.
    tokio::time::sleep(Duration::from_millis(400)).await;
}
