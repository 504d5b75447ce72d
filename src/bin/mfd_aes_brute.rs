/*! Brute force DESFire / Ultralight-C keys derived from
timestamp-seeded C-library random generators.

```no_run
$ mfd_aes_brute AES 0 1599999999 bb6aea729414a5b1eff7b16328ce37fd \
      82f5f498dbc29f7570102397a2e5ef2b6dc14a864f665b3c54d11765af81e95c
[…]
```

The generator index selects Borland (0), Numerical Recipes (1),
glibc (2), ANSI C (3), Turbo Pascal (4), POSIX `rand_r` (5) or
Microsoft `rand` (6).
*/
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use clap::Parser;

use tagcrack::timestamp_brute::{Algo, Lcg, TimestampJob, run};
use tagcrack::Error;

#[derive(clap::Parser, Debug)]
#[command(version, about = "Timestamp-seeded DES/2TDEA/3TDEA/AES key brute force")]
struct Opt {
    /// Crypto algorithm: DES, 2TDEA, 3TDEA or AES.
    algo: String,
    /// Random generator index, 0..6.
    generator: usize,
    /// Earliest candidate unix timestamp.
    timestamp: u64,
    /// Tag challenge (hex, 8 or 16 bytes by algorithm).
    tag: String,
    /// Reader response and challenge (hex, twice the tag length).
    rdr: String,

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

fn parse_challenge<const N: usize>(s: &str, want: usize) -> Result<[u8; N], Error> {
    let bytes = hex::decode(s).map_err(|e| Error::parse(format!("bad challenge hex: {e}")))?;
    if bytes.len() != want {
        return Err(Error::parse(format!(
            "challenge must be {want} bytes, got {}",
            bytes.len()
        )));
    }
    let mut out = [0u8; N];
    out[..want].copy_from_slice(&bytes);
    Ok(out)
}

fn main() -> Result<()> {
    let opt = Opt::parse();
    stderrlog::new()
        .module(module_path!())
        .module("tagcrack")
        .verbosity(usize::from(opt.verbose))
        .timestamp(stderrlog::Timestamp::Second)
        .init()?;

    let algo = Algo::from_arg(&opt.algo)
        .ok_or_else(|| Error::parse(format!("no such crypto algo {:?}", opt.algo)))?;
    let lcg = *Lcg::ALL
        .get(opt.generator)
        .ok_or_else(|| Error::parse(format!("generator index {} out of range", opt.generator)))?;

    let n = algo.challenge_len();
    let stop = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before 1970")
        .as_secs();
    let job = TimestampJob {
        algo,
        lcg,
        start: opt.timestamp,
        stop,
        tag: parse_challenge::<16>(&opt.tag, n)?,
        rdr: parse_challenge::<32>(&opt.rdr, 2 * n)?,
    };

    println!("Crypto algo............ {:?}", algo);
    println!("LCG random generator... {}", lcg.name());
    println!("Starting timestamp..... {}", job.start);
    println!("Tag challenge.......... {}", &opt.tag);
    println!("Rdr resp & challenge... {}", &opt.rdr);
    println!("\nBrute forcing with {} threads", opt.threads);

    let t0 = std::time::Instant::now();
    match run(&job, opt.threads) {
        Some(hit) => {
            println!("\nFound timestamp........ {}", hit.timestamp);
            println!("Key.................... {}", hex::encode_upper(&hit.key));
            println!("Execution time: {:.2}s", t0.elapsed().as_secs_f32());
            Ok(())
        }
        None => {
            println!("\nFailed to find a key");
            Err(Error::NoKeyFound.into())
        }
    }
}
