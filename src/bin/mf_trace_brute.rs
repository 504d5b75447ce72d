/*! Recover the top 16 bits of a partially known MIFARE Classic key
from an encrypted command captured after a nested authentication.

```no_run
$ mf_trace_brute 1b6b2d1a cafebabe 91d2c32f 4a8b1e77 1462eac7fa7c8b97…
[…]
Valid Key found [ 5A17CAFEBABE ]
```
*/
use anyhow::Result;
use clap::Parser;

use tagcrack::trace_brute::{ENC_MAX, TraceBruteJob, run};
use tagcrack::{Error, parse_hex_u32};

#[derive(clap::Parser, Debug)]
#[command(version, about = "Nested authentication key recovery, phase 2")]
struct Opt {
    /// Card UID (hex).
    uid: String,
    /// Known low 32 bits of the key (hex).
    part_key: String,
    /// Encrypted tag nonce (hex).
    nt_enc: String,
    /// Encrypted reader challenge (hex).
    nr_enc: String,
    /// Encrypted capture: next command plus a full read or write,
    /// up to 22 bytes of hex.
    enc: String,

    #[arg(long, default_value_t = default_threads())]
    threads: usize,

    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,
}

fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .max(2)
}

fn main() -> Result<()> {
    let opt = Opt::parse();
    stderrlog::new()
        .module(module_path!())
        .module("tagcrack")
        .verbosity(usize::from(opt.verbose))
        .timestamp(stderrlog::Timestamp::Second)
        .init()?;

    let enc = hex::decode(&opt.enc)
        .map_err(|e| Error::parse(format!("bad capture hex: {e}")))?;
    if enc.is_empty() || enc.len() > ENC_MAX {
        return Err(Error::parse(format!(
            "capture must be 1..={ENC_MAX} bytes, got {}",
            enc.len()
        ))
        .into());
    }

    let job = TraceBruteJob {
        uid: parse_hex_u32(&opt.uid)?,
        part_key: parse_hex_u32(&opt.part_key)?,
        nt_enc: parse_hex_u32(&opt.nt_enc)?,
        nr_enc: parse_hex_u32(&opt.nr_enc)?,
        enc,
    };

    println!("uid.................. {:08x}", job.uid);
    println!("partial key.......... {:08x}", job.part_key);
    println!("nt enc............... {:08x}", job.nt_enc);
    println!("nr enc............... {:08x}", job.nr_enc);
    println!("next encrypted cmd... {}", hex::encode_upper(&job.enc));
    println!();
    println!(
        "Brute forcing upper 16 bits of the key with {} threads",
        opt.threads
    );

    let t0 = std::time::Instant::now();
    match run(&job, opt.threads) {
        Some(hit) => {
            println!("\nenc:  {}", hex::encode_upper(&job.enc));
            println!("dec:  {}", hex::encode_upper(&hit.dec));
            println!("\nValid Key found [ {:012X} ]\n", hit.key);
            println!("Execution time: {:.2}s", t0.elapsed().as_secs_f32());
            Ok(())
        }
        None => {
            println!("\nFailed to find a key");
            Err(Error::NoKeyFound.into())
        }
    }
}
