//! Counter demo.
//!
//! Boots a scripted counter module against an in-memory page, clicks its
//! button a few times, and prints the resulting markup and bridge stats.

use anyhow::{Context, Result};
use blocks_bridge::document::{Document, MemoryDocument};
use blocks_bridge::events::{EventKind, NativeEvent};
use blocks_bridge::guest::ScriptedLoader;
use blocks_bridge::{bootstrap, BridgeConfig};
use std::cell::Cell;
use std::rc::Rc;

const CLICKS_UNTIL_DONE: u32 = 3;

const STYLE: &str = ".counter { font-family: sans-serif; } .button { cursor: pointer; }";

fn attrs(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn counter_module() -> ScriptedLoader {
    ScriptedLoader::new(|guest| {
        let count = Rc::new(Cell::new(0u32));
        let label = Rc::new(Cell::new(0u32));

        {
            let label = Rc::clone(&label);
            guest.on_callback(1, move |guest| {
                let mount = guest.mount_id()?;
                guest.println(&format!("mounting counter on #{}", mount))?;
                guest.inject_stylesheet(STYLE)?;

                let root = guest.create_element(0, &attrs(&[("class", "counter")]))?;
                let button = guest.create_element(root, &attrs(&[("class", "button")]))?;
                label.set(guest.create_text_node(button, "Count: 0")?);
                guest.create_event(button, EventKind::Click)?;
                Ok(())
            });
        }

        guest.on_event(move |guest, event| {
            let next = count.get() + 1;
            count.set(next);
            guest.println(&format!("click #{} on atom {}", next, event.atom))?;

            if next < CLICKS_UNTIL_DONE {
                guest.update_text_node(label.get(), &format!("Count: {}", next))
            } else {
                guest.element_to_text_node(event.atom, &format!("Done after {} clicks", next))
            }
        });

        guest.defer(1)
    })
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    blocks_bridge::init_tracing();

    let module_path = std::env::temp_dir().join("blocks-counter.wasm");
    tokio::fs::write(&module_path, b"\0asm\x01\0\0\0")
        .await
        .context("writing module binary")?;

    let doc = Rc::new(MemoryDocument::with_mount("app"));
    let script = doc.create_element("script");
    doc.set_attribute(script, "id", "blocks-loader");
    doc.set_attribute(script, "data-binary", &module_path.to_string_lossy());
    doc.set_attribute(script, "data-mount", "app");
    doc.append_child(doc.head(), script);

    let loader = counter_module();
    let bridge = bootstrap::load(BridgeConfig::default(), doc.clone(), &loader)
        .await
        .context("starting bridge")?;

    let mount = doc.element_by_id("app").context("mount element")?;
    let button = doc
        .children(mount)
        .first()
        .and_then(|root| doc.children(*root).first().copied())
        .context("counter button")?;

    for i in 0..CLICKS_UNTIL_DONE {
        doc.dispatch_kind(button, EventKind::Click, &NativeEvent::at(10 * i as i32, 5));
    }

    for line in bridge.console() {
        println!("[{}] {}", line.at.format("%H:%M:%S%.3f"), line.message);
    }
    println!("{}", doc.to_html(doc.root()));
    println!("{}", serde_json::to_string_pretty(&bridge.stats())?);

    let faults = bridge.take_faults();
    anyhow::ensure!(faults.is_empty(), "relay faults: {:?}", faults);
    Ok(())
}
