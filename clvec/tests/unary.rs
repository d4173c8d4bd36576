use clvec::{Array, ClError, Context, HostConfig, Queue};

const DATA: [f32; 10] = [3.285, 0.001, 1.780, 5.675, 8.521, 0.456, 1.215, 3.474, 4.128, 7.657];

fn queues() -> Result<Vec<Queue>, ClError> {
    Ok(Context::host(&HostConfig::default().with_devices(2))?.queues())
}

fn is_close(x: f32, y: f32) -> bool {
    (x - y).abs() <= 1e-5 * x.abs().max(1.0)
}

#[test]
fn sqrt() -> Result<(), ClError> {
    let queues = queues()?;
    let x = Array::from_slice(&queues, &DATA)?;
    let z = Array::<f32>::new(&queues, DATA.len())?;
    z.assign(clvec::sqrt(&x))?;
    for (x, y) in DATA.iter().zip(z.to_vec()?) {
        assert!(is_close(x.sqrt(), y), "{} != {y}", x.sqrt());
    }
    Ok(())
}

#[test]
fn exp_log() -> Result<(), ClError> {
    let queues = queues()?;
    let x = Array::from_slice(&queues, &DATA)?;
    let z = Array::<f32>::new(&queues, DATA.len())?;
    z.assign(clvec::exp(clvec::log(&x)))?;
    for (x, y) in DATA.iter().zip(z.to_vec()?) {
        assert!(is_close(*x, y), "{x} != {y}");
    }
    z.assign(clvec::exp2(&x))?;
    for (x, y) in DATA.iter().zip(z.to_vec()?) {
        assert!(is_close(x.exp2(), y), "{} != {y}", x.exp2());
    }
    Ok(())
}

#[test]
fn trigonometry() -> Result<(), ClError> {
    let queues = queues()?;
    let x = Array::from_slice(&queues, &DATA)?;
    let z = Array::<f32>::new(&queues, DATA.len())?;
    z.assign(clvec::sin(&x) * clvec::sin(&x) + clvec::cos(&x) * clvec::cos(&x))?;
    for y in z.to_vec()? {
        assert!(is_close(1.0, y), "1 != {y}");
    }
    z.assign(clvec::sinpi(&x))?;
    for (x, y) in DATA.iter().zip(z.to_vec()?) {
        assert!((f64::from(*x) * core::f64::consts::PI).sin() as f32 == y);
    }
    Ok(())
}

#[test]
fn rounding() -> Result<(), ClError> {
    let queues = queues()?;
    let x = Array::from_slice(&queues, &[-1.5f64, -0.5, 0.5, 1.5, 2.5])?;
    let z = Array::<f64>::new(&queues, 5)?;
    z.assign(clvec::rint(&x))?;
    assert_eq!(z.to_vec()?, [-2., -0., 0., 2., 2.]);
    z.assign(clvec::round(&x))?;
    assert_eq!(z.to_vec()?, [-2., -1., 1., 2., 3.]);
    z.assign(clvec::floor(&x))?;
    assert_eq!(z.to_vec()?, [-2., -1., 0., 1., 2.]);
    z.assign(clvec::fabs(-&x))?;
    assert_eq!(z.to_vec()?, [1.5, 0.5, 0.5, 1.5, 2.5]);
    Ok(())
}

#[test]
fn neg() -> Result<(), ClError> {
    let queues = queues()?;
    let x = Array::from_slice(&queues, &[1i64, -2, i64::MIN, 0])?;
    let z = Array::<i64>::new(&queues, 4)?;
    z.assign(-&x)?;
    assert_eq!(z.to_vec()?, [-1, 2, i64::MIN, 0]);
    Ok(())
}

#[test]
fn kernel_names() {
    let x = Array::<f32>::empty();
    assert_eq!(clvec::sin(&x).kernel_name(), "sinv");
    assert_eq!((-&x).kernel_name(), "negv");
    assert_eq!(clvec::sqrt(&x + 1f32).kernel_name(), "sqrtpvc");
}
