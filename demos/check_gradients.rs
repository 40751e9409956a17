//! Gradient Checks and a Hand-Composed Network
//!
//! Runs finite-difference checks for the kernels of a small two-layer
//! classifier across several seeds, then trains that classifier with plain
//! SGD by chaining forward kernels and their backward kernels in reverse.
//! The integration tests in `tests/gradient_checks.rs` cover every kernel.
//!
//! ## Usage
//!
//! ```bash
//! # Check the network's kernels over five seeds, then train
//! cargo run --release --example check_gradients
//!
//! # One kernel, more seeds, show per-seed errors
//! RUST_LOG=debug cargo run --release --example check_gradients -- --kernel batchnorm --seeds 20
//!
//! # Only the training demo
//! cargo run --release --example check_gradients -- --kernel none --steps 500 --lr 0.5
//! ```

use clap::{Parser, ValueEnum};
use handgrad::gradient_check::{
    eval_numerical_gradient, eval_numerical_gradient_array, rel_error, DEFAULT_STEP,
};
use handgrad::layers::*;
use handgrad::{BatchNormOptions, Mode, Result, Tensor};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Kernel {
    All,
    None,
    Affine,
    Relu,
    Batchnorm,
    Softmax,
}

/// Kernels of the training network, in forward order
const KERNELS: &[Kernel] = &[
    Kernel::Affine,
    Kernel::Batchnorm,
    Kernel::Relu,
    Kernel::Softmax,
];

#[derive(Parser)]
#[command(
    name = "check_gradients",
    about = "Finite-difference gradient checks and a tiny SGD training run"
)]
struct Args {
    /// Kernel to check (`all` checks every kernel, `none` skips checking)
    #[arg(long, value_enum, default_value = "all")]
    kernel: Kernel,

    /// Number of random seeds per kernel
    #[arg(long, default_value = "5")]
    seeds: u64,

    /// Relative error above which a check is reported as failed
    #[arg(long, default_value = "1e-5")]
    tolerance: f64,

    // Training parameters
    /// SGD steps for the training demo (0 skips it)
    #[arg(long, default_value = "300")]
    steps: usize,

    /// Learning rate
    #[arg(long, default_value = "0.2")]
    lr: f64,

    /// Hidden layer width
    #[arg(long, default_value = "32")]
    hidden: usize,
}

fn randn(shape: &[usize], rng: &mut StdRng) -> Tensor {
    Tensor::randn(shape.to_vec(), rng)
}

/// Relative errors `(gradient name, error)` for one kernel at one seed.
fn check_kernel(kernel: Kernel, seed: u64) -> Result<Vec<(&'static str, f64)>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let h = DEFAULT_STEP;
    let errors = match kernel {
        Kernel::Affine => {
            let x = randn(&[4, 2, 3], &mut rng);
            let w = randn(&[6, 5], &mut rng);
            let b = randn(&[5], &mut rng);
            let dout = randn(&[4, 5], &mut rng);
            let (_, cache) = affine_forward(&x, &w, &b)?;
            let grads = affine_backward(&dout, &cache)?;
            let dx = eval_numerical_gradient_array(|x| Ok(affine_forward(x, &w, &b)?.0), &x, &dout, h)?;
            let dw = eval_numerical_gradient_array(|w| Ok(affine_forward(&x, w, &b)?.0), &w, &dout, h)?;
            let db = eval_numerical_gradient_array(|b| Ok(affine_forward(&x, &w, b)?.0), &b, &dout, h)?;
            vec![
                ("dx", rel_error(&grads.x, &dx)?),
                ("dw", rel_error(&grads.w, &dw)?),
                ("db", rel_error(&grads.b, &db)?),
            ]
        }
        Kernel::Relu => {
            let x = randn(&[10, 10], &mut rng);
            let dout = randn(&[10, 10], &mut rng);
            let (_, cache) = relu_forward(&x);
            let dx = relu_backward(&dout, &cache)?;
            let num = eval_numerical_gradient_array(|x| Ok(relu_forward(x).0), &x, &dout, h)?;
            vec![("dx", rel_error(&dx, &num)?)]
        }
        Kernel::Softmax => {
            let x = randn(&[50, 10], &mut rng).mul_scalar(0.001);
            let labels: Vec<usize> = (0..50).map(|i| (i * 7 + seed as usize) % 10).collect();
            let (_, dx) = softmax_loss(&x, &labels)?;
            let num = eval_numerical_gradient(|x| Ok(softmax_loss(x, &labels)?.0), &x, h)?;
            vec![("dx", rel_error(&dx, &num)?)]
        }
        Kernel::Batchnorm => {
            let options = BatchNormOptions::default();
            let x = randn(&[4, 5], &mut rng).map(|v| 5.0 * v + 12.0);
            let gamma = randn(&[5], &mut rng);
            let beta = randn(&[5], &mut rng);
            let dout = randn(&[4, 5], &mut rng);
            let forward = |x: &Tensor| -> Result<Tensor> {
                Ok(batchnorm_forward(x, &gamma, &beta, &options, &mut RunningStats::default())?.0)
            };
            let (_, cache) = batchnorm_forward(&x, &gamma, &beta, &options, &mut RunningStats::default())?;
            let cache = cache.ok_or_else(|| handgrad::Error::config("train mode produced no cache"))?;
            let num = eval_numerical_gradient_array(forward, &x, &dout, h)?;
            let staged = batchnorm_backward(&dout, &cache)?;
            let closed = batchnorm_backward_alt(&dout, &cache)?;
            vec![
                ("dx", rel_error(&staged.x, &num)?),
                ("dx (alt)", rel_error(&closed.x, &num)?),
                ("dx staged vs alt", rel_error(&staged.x, &closed.x)?),
            ]
        }
        Kernel::All | Kernel::None => Vec::new(),
    };
    Ok(errors)
}

/// Three Gaussian blobs in the plane, one per class.
fn blobs(n_per_class: usize, rng: &mut StdRng) -> Result<(Tensor, Vec<usize>)> {
    let centers = [(0.0, 2.0), (-2.0, -1.0), (2.0, -1.0)];
    let noise = randn(&[centers.len() * n_per_class, 2], rng);
    let mut data = Vec::with_capacity(noise.numel());
    let mut labels = Vec::with_capacity(centers.len() * n_per_class);
    for (i, point) in noise.data.chunks(2).enumerate() {
        let class = i / n_per_class;
        let (cx, cy) = centers[class];
        data.push(cx + 0.6 * point[0]);
        data.push(cy + 0.6 * point[1]);
        labels.push(class);
    }
    Ok((Tensor::new(data, vec![centers.len() * n_per_class, 2])?, labels))
}

fn accuracy(scores: &Tensor, labels: &[usize]) -> f64 {
    let classes = scores.shape[1];
    let correct = scores
        .data
        .chunks(classes)
        .zip(labels)
        .filter(|&(row, &y)| {
            let best = row
                .iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |acc, (j, &v)| if v > acc.1 { (j, v) } else { acc });
            best.0 == y
        })
        .count();
    correct as f64 / labels.len() as f64
}

/// affine -> batchnorm -> relu -> affine -> softmax, trained with SGD.
fn train(args: &Args) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(0);
    let (x, labels) = blobs(50, &mut rng)?;
    let (d, hidden, classes) = (2, args.hidden, 3);

    let mut w1 = randn(&[d, hidden], &mut rng).mul_scalar((2.0 / d as f64).sqrt());
    let mut b1 = Tensor::zeros(vec![hidden]);
    let mut gamma = Tensor::full(vec![hidden], 1.0);
    let mut beta = Tensor::zeros(vec![hidden]);
    let mut w2 = randn(&[hidden, classes], &mut rng).mul_scalar((1.0 / hidden as f64).sqrt());
    let mut b2 = Tensor::zeros(vec![classes]);
    let mut stats = RunningStats::default();
    let bn_train = BatchNormOptions::default();

    for step in 0..args.steps {
        // Forward
        let (a1, affine1) = affine_forward(&x, &w1, &b1)?;
        let (n1, bn) = batchnorm_forward(&a1, &gamma, &beta, &bn_train, &mut stats)?;
        let bn = bn.ok_or_else(|| handgrad::Error::config("train mode produced no cache"))?;
        let (r1, relu) = relu_forward(&n1);
        let (scores, affine2) = affine_forward(&r1, &w2, &b2)?;
        let (loss, dscores) = softmax_loss(&scores, &labels)?;

        // Backward, in reverse
        let g2 = affine_backward(&dscores, &affine2)?;
        let dr1 = relu_backward(&g2.x, &relu)?;
        let gbn = batchnorm_backward_alt(&dr1, &bn)?;
        let g1 = affine_backward(&gbn.x, &affine1)?;

        // SGD update
        w1 = w1.sub(&g1.w.mul_scalar(args.lr))?;
        b1 = b1.sub(&g1.b.mul_scalar(args.lr))?;
        gamma = gamma.sub(&gbn.gamma.mul_scalar(args.lr))?;
        beta = beta.sub(&gbn.beta.mul_scalar(args.lr))?;
        w2 = w2.sub(&g2.w.mul_scalar(args.lr))?;
        b2 = b2.sub(&g2.b.mul_scalar(args.lr))?;

        if step % 50 == 0 || step + 1 == args.steps {
            info!(step, loss, train_acc = accuracy(&scores, &labels), "sgd");
        }
    }

    // Evaluate with running statistics
    let bn_test = BatchNormOptions::with_mode(Mode::Test);
    let (a1, _) = affine_forward(&x, &w1, &b1)?;
    let (n1, _) = batchnorm_forward(&a1, &gamma, &beta, &bn_test, &mut stats)?;
    let (r1, _) = relu_forward(&n1);
    let (scores, _) = affine_forward(&r1, &w2, &b2)?;
    let (loss, _) = softmax_loss(&scores, &labels)?;
    info!(loss, accuracy = accuracy(&scores, &labels), "test mode");
    Ok(())
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let kernels: Vec<Kernel> = match args.kernel {
        Kernel::All => KERNELS.to_vec(),
        Kernel::None => Vec::new(),
        k => vec![k],
    };

    if !kernels.is_empty() {
        println!("\n{}", "=".repeat(70));
        println!("  Gradient checks ({} seeds, tolerance {:e})", args.seeds, args.tolerance);
        println!("{}", "=".repeat(70));
    }

    let mut failures = 0;
    for &kernel in &kernels {
        let mut worst = 0.0f64;
        for seed in 0..args.seeds {
            for (name, err) in check_kernel(kernel, seed)? {
                debug!(?kernel, seed, name, err, "relative error");
                if err >= args.tolerance {
                    warn!(?kernel, seed, name, err, "gradient check failed");
                    failures += 1;
                }
                worst = worst.max(err);
            }
        }
        println!("  {:<18} worst relative error {:.3e}", format!("{kernel:?}"), worst);
    }

    if args.steps > 0 {
        println!("\n{}", "=".repeat(70));
        println!("  Training: affine -> batchnorm -> relu -> affine -> softmax");
        println!("{}", "=".repeat(70));
        train(&args)?;
    }

    if failures > 0 {
        return Err(format!("{failures} gradient checks exceeded the tolerance").into());
    }
    Ok(())
}
