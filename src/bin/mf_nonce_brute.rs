/*! Recover a MIFARE Classic key from a captured nested
authentication with parity information.

```no_run
$ mf_nonce_brute fa247164 fb47c594 0000 71909d28 0c254817 1000 0dc7cfbd 1110
[…]
Valid Key found [ FFFFFFFFFFFF ]
```

The parity-error words carry one flag bit per nibble, low nibble
first, as produced by the trace tools (`8c! 42 e6! 4e!` becomes
`1011`).
*/
use anyhow::Result;
use clap::Parser;

use tagcrack::nonce_brute::{Confidence, NonceBruteJob, run};
use tagcrack::{Error, parse_hex_u32};

#[derive(clap::Parser, Debug)]
#[command(version, about = "Nested authentication key recovery, phase 1")]
struct Opt {
    /// Card UID (hex).
    uid: String,
    /// Encrypted tag nonce (hex).
    nt_enc: String,
    /// Tag nonce parity error flags (hex).
    nt_par_err: String,
    /// Encrypted reader challenge (hex).
    nr_enc: String,
    /// Encrypted reader response (hex).
    ar_enc: String,
    /// Reader response parity error flags (hex).
    ar_par_err: String,
    /// Encrypted tag response (hex).
    at_enc: String,
    /// Tag response parity error flags (hex).
    at_par_err: String,
    /// Next encrypted command, if one was captured (hex).
    cmd_enc: Option<String>,

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

    let job = NonceBruteJob {
        uid: parse_hex_u32(&opt.uid)?,
        nt_enc: parse_hex_u32(&opt.nt_enc)?,
        nr_enc: parse_hex_u32(&opt.nr_enc)?,
        ar_enc: parse_hex_u32(&opt.ar_enc)?,
        at_enc: parse_hex_u32(&opt.at_enc)?,
        nt_par_err: parse_hex_u32(&opt.nt_par_err)? as u16,
        ar_par_err: parse_hex_u32(&opt.ar_par_err)? as u16,
        at_par_err: parse_hex_u32(&opt.at_par_err)? as u16,
        cmd_enc: opt.cmd_enc.as_deref().map(parse_hex_u32).transpose()?,
    };

    println!("uid............. {:08x}", job.uid);
    println!("nt encrypted.... {:08x}", job.nt_enc);
    println!("nt parity err... {:04x}", job.nt_par_err);
    println!("nr encrypted.... {:08x}", job.nr_enc);
    println!("ar encrypted.... {:08x}", job.ar_enc);
    println!("ar parity err... {:04x}", job.ar_par_err);
    println!("at encrypted.... {:08x}", job.at_enc);
    println!("at parity err... {:04x}", job.at_par_err);
    if let Some(c) = job.cmd_enc {
        println!("next cmd enc.... {c:08x}");
    }
    println!();
    println!(
        "Brute forcing encrypted tag nonce last bytes with {} threads",
        opt.threads
    );

    let t0 = std::time::Instant::now();
    let findings = run(&job, opt.threads, true);
    for f in &findings {
        if let Some(dec) = f.cmd_dec {
            println!("cmd decrypted... {dec:08x}");
        }
        match f.confidence {
            Confidence::Valid => println!("\nValid Key found [ {:012X} ]\n", f.key),
            Confidence::Candidate => println!("\nPossible key candidate [ {:012X} ]\n", f.key),
        }
    }
    println!("Execution time: {:.2}s", t0.elapsed().as_secs_f32());

    if findings.is_empty() {
        println!("\nFailed to find a key");
        return Err(Error::NoKeyFound.into());
    }
    Ok(())
}
