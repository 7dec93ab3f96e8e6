//! Basic usage of the nibbledb state store.
//!
//! Run with: cargo run --example basic_usage

use nibbledb::data::{Key, NibblePath};
use nibbledb::store::{CommitOptions, StateStore};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut store = StateStore::in_memory(2000)?;

    // Write a couple of accounts and some storage cells in one batch.
    let alice = NibblePath::from_bytes(&[0xA1; 32]);
    let bob = NibblePath::from_bytes(&[0xB0; 32]);

    let mut batch = store.begin()?;
    batch.set(&Key::account(alice.clone()), b"alice: balance=1000,nonce=1")?;
    batch.set(&Key::account(bob.clone()), b"bob: balance=50,nonce=0")?;
    for i in 0u8..10 {
        batch.set(
            &Key::storage_cell(alice.clone(), &[i; 32]),
            &[i, i + 1, i + 2],
        )?;
    }
    batch.commit(CommitOptions::DangerNoFlush)?;

    // Read back through the committed snapshot.
    let balance = store.get(&Key::account(alice.clone())).unwrap();
    println!("alice -> {}", String::from_utf8_lossy(&balance));

    let cell = store.get(&Key::storage_cell(alice, &[3; 32])).unwrap();
    println!("alice storage[3] -> {:?}", cell);

    // Inspect how the tree uses its pages.
    let report = store.usage_report();
    for (level, usage) in report.levels().iter().enumerate() {
        println!(
            "level {}: {} page(s), {} bucket(s), {} entr(ies)",
            level, usage.pages, usage.buckets_used, usage.entries
        );
    }
    println!(
        "pages allocated: {}",
        store.metrics().snapshot().pages_allocated
    );

    Ok(())
}
