use clvec::{Array, ClError, Context, DeviceKind, HostConfig, Queue};

fn queues(devices: usize) -> Result<Vec<Queue>, ClError> {
    Ok(Context::host(&HostConfig::default().with_devices(devices))?.queues())
}

fn data(n: usize, scale: f32) -> Vec<f32> {
    (0..n).map(|i| (i as f32 + 1.0) * scale).collect()
}

#[test]
fn add() -> Result<(), ClError> {
    let queues = queues(2)?;
    let x = Array::from_slice(&queues, &[1f32, 2., 3., 4.])?;
    let y = Array::from_slice(&queues, &[2f32, 2., 2., 2.])?;
    let z = Array::<f32>::new(&queues, 4)?;
    z.assign(&x + &y)?;
    assert_eq!(z.to_vec()?, [3., 4., 5., 6.]);
    Ok(())
}

#[test]
fn sub_mul_div() -> Result<(), ClError> {
    let queues = queues(2)?;
    let x = Array::from_slice(&queues, &[1f32, 2., 3., 4.])?;
    let y = Array::from_slice(&queues, &[2f32, 2., 2., 2.])?;
    let z = Array::<f32>::new(&queues, 4)?;
    z.assign(&x - &y)?;
    assert_eq!(z.to_vec()?, [-1., 0., 1., 2.]);
    z.assign(&x * &y)?;
    assert_eq!(z.to_vec()?, [2., 4., 6., 8.]);
    z.assign(&x / &y)?;
    assert_eq!(z.to_vec()?, [0.5, 1., 1.5, 2.]);
    Ok(())
}

#[test]
fn spans_devices() -> Result<(), ClError> {
    let queues = queues(3)?;
    let n = 1000;
    let a = data(n, 1.0);
    let b = data(n, 0.5);
    let x = Array::from_slice(&queues, &a)?;
    let y = Array::from_slice(&queues, &b)?;
    assert!((0..3).all(|d| x.part_size(d) > 0));
    let z = Array::<f32>::new(&queues, n)?;
    z.assign(2f32 * &x + &y * &y - 1f32)?;
    let expected: Vec<f32> = a.iter().zip(&b).map(|(a, b)| 2. * a + b * b - 1.).collect();
    assert_eq!(z.to_vec()?, expected);
    Ok(())
}

#[test]
fn integers() -> Result<(), ClError> {
    let queues = queues(2)?;
    let x = Array::from_slice(&queues, &[7i32, -8, 9, 100])?;
    let y = Array::from_slice(&queues, &[2i32, 3, 0, -7])?;
    let z = Array::<i32>::new(&queues, 4)?;
    z.assign(&x / &y)?;
    assert_eq!(z.to_vec()?, [3, -2, 0, -14]);
    z.assign(-&x + 1)?;
    assert_eq!(z.to_vec()?, [-6, 9, -8, -99]);
    let w = Array::from_slice(&queues, &[250u8, 1, 2, 3])?;
    let v = Array::<u8>::new(&queues, 4)?;
    v.assign(&w + 10u8)?;
    assert_eq!(v.to_vec()?, [4, 11, 12, 13]);
    Ok(())
}

#[test]
fn f64_arrays() -> Result<(), ClError> {
    let queues = queues(2)?;
    let x = Array::from_slice(&queues, &[1f64, 4., 9., 16.])?;
    let z = Array::<f64>::new(&queues, 4)?;
    z.assign(&x * 0.5 + 0.25)?;
    assert_eq!(z.to_vec()?, [0.75, 2.25, 4.75, 8.25]);
    Ok(())
}

#[test]
fn scalar_commutativity() -> Result<(), ClError> {
    let queues = queues(2)?;
    let a = data(200, 0.25);
    let x = Array::from_slice(&queues, &a)?;
    let left = Array::<f32>::new(&queues, a.len())?;
    let right = Array::<f32>::new(&queues, a.len())?;

    left.assign(3f32 * &x)?;
    right.assign(&x * 3f32)?;
    assert_eq!(left.to_vec()?, right.to_vec()?);

    left.assign(1.5f32 + &x)?;
    right.assign(&x + 1.5f32)?;
    assert_eq!(left.to_vec()?, right.to_vec()?);

    left.assign(1f32 - &x)?;
    right.assign(-(&x - 1f32))?;
    assert_eq!(left.to_vec()?, right.to_vec()?);
    Ok(())
}

#[test]
fn compound_assignment() -> Result<(), ClError> {
    let queues = queues(3)?;
    let a = data(500, 1.0);
    let b = data(500, 0.125);
    let x = Array::from_slice(&queues, &b)?;

    let mut compound = Array::from_slice(&queues, &a)?;
    let plain = Array::from_slice(&queues, &a)?;

    compound += &x;
    plain.assign(&plain + &x)?;
    assert_eq!(compound.to_vec()?, plain.to_vec()?);

    compound -= 2f32 * &x;
    plain.assign(&plain - 2f32 * &x)?;
    assert_eq!(compound.to_vec()?, plain.to_vec()?);

    compound *= 3f32;
    plain.assign(&plain * 3f32)?;
    assert_eq!(compound.to_vec()?, plain.to_vec()?);

    compound /= &x;
    plain.assign(&plain / &x)?;
    assert_eq!(compound.to_vec()?, plain.to_vec()?);
    Ok(())
}

#[test]
#[should_panic(expected = "Partition mismatch")]
fn compound_assignment_panics() {
    let queues = queues(2).unwrap();
    let mut x = Array::<f32>::new(&queues, 100).unwrap();
    let y = Array::<f32>::new(&queues, 50).unwrap();
    x += &y;
}

#[test]
fn grid_striding_matches_guarded() -> Result<(), ClError> {
    let cpu = Context::host(&HostConfig::default().with_devices(2))?.queues();
    let gpu = Context::host(
        &HostConfig::default().with_devices(2).with_kind(DeviceKind::Gpu).with_compute_units(2),
    )?
    .queues();
    assert_eq!(gpu[0].context().kind(), DeviceKind::Gpu);
    let a = data(3000, 0.01);
    let b = data(3000, 2.0);
    let mut results = Vec::new();
    for queues in [&cpu, &gpu] {
        let x = Array::from_slice(queues, &a)?;
        let y = Array::from_slice(queues, &b)?;
        let z = Array::<f32>::new(queues, a.len())?;
        z.assign(clvec::sin(&x) * &y + 0.5f32)?;
        results.push(z.to_vec()?);
    }
    assert_eq!(results[0], results[1]);
    Ok(())
}
