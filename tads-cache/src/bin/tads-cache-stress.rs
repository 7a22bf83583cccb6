//! Run a reproducible workload against a small cache and report on it.
//!
//! Usage: `tads-cache-stress [config.json]`

use {
    anyhow::{Context, Result, bail},
    std::{cell::RefCell, env, fs},
    tads_cache::{
        ClientContext, Config, Error, GlobalContext, MemorySwap, ObjNum, SwapManager,
    },
};

const ROUNDS: usize = 5000;

/// Deterministic pseudo-random numbers.
struct Lcg(u64);

impl Lcg
{
    fn below(&mut self, n: usize) -> usize
    {
        self.0 = self.0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.0 >> 33) % n as u64) as usize
    }
}

struct Live
{
    clinum: ObjNum,
    byte: u8,
    size: usize,
}

fn main() -> Result<()>
{
    let config = match env::args_os().nth(1) {
        Some(path) => {
            let json = fs::read_to_string(&path)
                .with_context(|| format!("Read {}", path.to_string_lossy()))?;
            Config::from_json(&json).context("Parse configuration")?
        },
        None => Config::default(),
    };

    let swap = SwapManager::new(Box::new(MemorySwap::new()), config.swap_budget);
    let global = RefCell::new(GlobalContext::new(config, swap)?);
    let client = ClientContext::new(&global, None);

    let max_size = global.borrow().max_object_size() / 4;
    let mut rng = Lcg(0x7ad5);
    let mut live: Vec<Live> = Vec::new();
    let mut out_of_memory = 0;

    for round in 0 .. ROUNDS {
        match rng.below(5) {
            0 | 1 => {
                let size = 1 + rng.below(max_size);
                match client.alloc(size) {
                    Ok(mut guard) => {
                        let byte = round as u8;
                        guard.bytes_mut()?[.. size].fill(byte);
                        live.push(Live{clinum: guard.clinum(), byte, size});
                    },
                    Err(Error::OutOfMemory) => out_of_memory += 1,
                    Err(err) => return Err(err.into()),
                }
            },
            2 | 3 if !live.is_empty() => {
                let object = &live[rng.below(live.len())];
                verify(&client, object)?;
            },
            4 if !live.is_empty() => {
                let object = live.swap_remove(rng.below(live.len()));
                client.free(object.clinum)?;
            },
            _ => (),
        }
    }

    for object in &live {
        verify(&client, object)?;
    }

    let stats = global.borrow().stats();
    println!("rounds:            {}", ROUNDS);
    println!("live objects:      {}", live.len());
    println!("out of memory:     {}", out_of_memory);
    println!("chunks:            {}", stats.chunks);
    println!("free blocks:       {} ({} bytes)", stats.free_blocks, stats.free_bytes);
    println!("resident objects:  {}", stats.lru_objects + stats.locked_objects);
    println!("swapped objects:   {}", stats.absent_objects);
    println!("swap writes:       {}", stats.swap.writes);
    println!("swap reads:        {}", stats.swap.reads);
    println!("swap file size:    {}", stats.swap.file_size);

    Ok(())
}

fn verify(client: &ClientContext<'_>, object: &Live) -> Result<()>
{
    let guard = client.lock(object.clinum)?;
    let bytes = guard.bytes()?;
    if !bytes[.. object.size].iter().all(|&b| b == object.byte) {
        bail!("Object {} was corrupted", object.clinum);
    }
    Ok(())
}
