/*! Brute force one 4-byte segment of a MIFARE Ultralight-C 2TDEA
key.

Counterfeit mode compares a genuine card against an all-zero-key
clone; reader mode uses a live reader exchange:

```no_run
$ mfulc_des_brute -c <null key ERndB> <target ERndB> <base key> 1 8
$ mfulc_des_brute -r <ERndB> <ERndARndB'> <base key> 3 8
```
*/
use anyhow::Result;
use clap::Parser;

use tagcrack::ulc_brute::{Mode, SEGMENT_SPACE, UlcBruteJob, run};
use tagcrack::Error;

#[derive(clap::Parser, Debug)]
#[command(version, about = "Ultralight-C 2TDEA key segment brute force")]
struct Opt {
    /// Counterfeit mode: blocks are the null-key and target ERndB.
    #[arg(short = 'c', conflicts_with = "reader")]
    counterfeit: bool,

    /// Reader mode: blocks are ERndB and ERndA|RndB'.
    #[arg(short = 'r')]
    reader: bool,

    /// First ciphertext block (hex, 8 bytes).
    block1: String,
    /// Second ciphertext block (hex, 8 bytes in -c, 16 in -r).
    block2: String,
    /// The 16-byte 2TDEA base key (hex).
    base_key: String,
    /// Key segment to brute force, 1..4.
    segment: u8,
    /// Worker threads.
    threads: usize,

    /// Scan the full keyspace even after a hit.
    #[arg(long)]
    benchmark: bool,

    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,
}

fn fixed_hex<const N: usize>(s: &str, what: &str) -> Result<[u8; N], Error> {
    hex::decode(s)
        .map_err(|e| Error::parse(format!("bad {what} hex: {e}")))?
        .try_into()
        .map_err(|_| Error::parse(format!("{what} must be {} bytes", N)))
}

fn main() -> Result<()> {
    let opt = Opt::parse();
    stderrlog::new()
        .module(module_path!())
        .module("tagcrack")
        .verbosity(usize::from(opt.verbose))
        .timestamp(stderrlog::Timestamp::Second)
        .init()?;

    if !opt.counterfeit && !opt.reader {
        return Err(Error::parse("pick a mode: -c or -r".to_string()).into());
    }
    let mode = if opt.counterfeit {
        Mode::Counterfeit {
            null_ct: fixed_hex::<8>(&opt.block1, "null-key ERndB")?,
            target_ct: fixed_hex::<8>(&opt.block2, "target ERndB")?,
        }
    } else {
        Mode::Reader {
            erndb: fixed_hex::<8>(&opt.block1, "ERndB")?,
            ernda_rndb: fixed_hex::<16>(&opt.block2, "ERndARndB'")?,
        }
    };
    let job = UlcBruteJob {
        mode,
        base_key: fixed_hex::<16>(&opt.base_key, "base key")?,
        segment: opt.segment,
        benchmark: opt.benchmark,
    };
    if opt.threads == 0 {
        return Err(Error::parse("number of threads must be at least 1".to_string()).into());
    }

    println!(
        "Brute forcing key segment {} with {} threads",
        job.segment, opt.threads
    );

    let t0 = std::time::Instant::now();
    let keys = run(&job, opt.threads, SEGMENT_SPACE)?;
    for key in &keys {
        println!("\nValid Key found [ {} ]", hex::encode_upper(key));
    }
    println!("Execution time: {:.2}s", t0.elapsed().as_secs_f32());

    if keys.is_empty() {
        println!("\nNo matching key was found");
        return Err(Error::NoKeyFound.into());
    }
    Ok(())
}
