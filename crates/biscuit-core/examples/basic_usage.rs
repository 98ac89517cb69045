//! Basic usage example - print the BIDS tree of a folder and plan a merge

use biscuit_core::bids::BidsTree;
use biscuit_core::copy::format_size;
use biscuit_core::merge::{plan_merge, MergeOptions};
use biscuit_core::Result;
use std::path::PathBuf;

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let src = PathBuf::from(args.next().unwrap_or_else(|| "./BIDS/WS001".to_string()));

    println!("Reading {}", src.display());
    let tree = BidsTree::open(&src)?;
    print!("{}", tree);

    if let Some(dst) = args.next() {
        let plan = plan_merge(&src, &PathBuf::from(dst), &MergeOptions::default())?;
        println!("{}", plan);
        println!("{} would be transferred", format_size(plan.bytes_to_copy()));
    }

    Ok(())
}
