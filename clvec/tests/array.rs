use clvec::{Array, ClError, Context, HostConfig, MemFlags, Queue};

fn queues(devices: usize) -> Result<Vec<Queue>, ClError> {
    Ok(Context::host(&HostConfig::default().with_devices(devices))?.queues())
}

#[test]
fn round_trip() -> Result<(), ClError> {
    let queues = queues(3)?;
    for n in [0, 1, 17, 1000] {
        let data: Vec<i32> = (0..n).map(|i| i * 3 - 7).collect();
        let x = Array::from_slice(&queues, &data)?;
        assert_eq!(x.len(), data.len());
        assert_eq!(x.nparts(), 3);
        assert_eq!(x.partition().len(), 4);
        assert_eq!(x.to_vec()?, data);
    }
    Ok(())
}

#[test]
fn ranged_copies() -> Result<(), ClError> {
    let queues = queues(2)?;
    let x = Array::<u32>::new(&queues, 100)?;
    x.fill(0)?;
    // Crosses the boundary between the two parts at 64
    x.write(60, &[1, 2, 3, 4, 5, 6], false)?;
    let mut out = [0u32; 8];
    x.read(59, &mut out, true)?.wait()?;
    assert_eq!(out, [0, 1, 2, 3, 4, 5, 6, 0]);
    x.write(0, &[], true)?;
    Ok(())
}

#[test]
fn non_blocking_read() -> Result<(), ClError> {
    let queues = queues(2)?;
    let data: Vec<f32> = (0..300).map(|i| i as f32).collect();
    let x = Array::from_slice(&queues, &data)?;
    let mut out = vec![0f32; 300];
    let transfer = x.read(0, &mut out, false)?;
    transfer.wait()?;
    assert_eq!(out, data);

    let mut part = [0f32; 5];
    {
        // Completes when dropped
        let _transfer = x.read(62, &mut part, false)?;
    }
    assert_eq!(part, [62., 63., 64., 65., 66.]);
    Ok(())
}

#[test]
fn get_set() -> Result<(), ClError> {
    let queues = queues(2)?;
    let x = Array::from_slice(&queues, &[1f64; 100])?;
    x.set(70, 5.5)?;
    assert_eq!(x.get(70)?, 5.5);
    assert_eq!(x.get(69)?, 1.);
    assert_eq!(x.get(99)?, 1.);
    Ok(())
}

#[test]
fn resize_preserves_prefix() -> Result<(), ClError> {
    let queues = queues(2)?;
    let data: Vec<i16> = (0..100).collect();
    let mut x = Array::from_slice(&queues, &data)?;
    x.resize(150)?;
    assert_eq!(x.len(), 150);
    assert_eq!(x.to_vec()?[..100], data[..]);
    x.resize(30)?;
    assert_eq!(x.to_vec()?, data[..30]);
    x.resize(0)?;
    assert!(x.is_empty());
    assert!(x.to_vec()?.is_empty());
    Ok(())
}

#[test]
fn copies() -> Result<(), ClError> {
    let queues = queues(3)?;
    let data: Vec<u64> = (0..500).map(|i| i * i).collect();
    let x = Array::from_slice(&queues, &data)?;

    let y = x.try_clone()?;
    assert_eq!(y.partition(), x.partition());
    x.fill(7)?;
    assert_eq!(y.to_vec()?, data);

    let z = Array::<u64>::new(&queues, 500)?;
    z.assign(&y)?;
    assert_eq!(z.to_vec()?, data);
    z.copy_from(&x)?;
    assert_eq!(z.to_vec()?, vec![7; 500]);

    let mut w = Array::<u64>::empty();
    w.resize_to(&y)?;
    assert_eq!(w.len(), 500);
    assert_eq!(w.to_vec()?, data);
    Ok(())
}

#[test]
fn flags_and_wait() -> Result<(), ClError> {
    let queues = queues(2)?;
    let x = Array::<f32>::with_flags(&queues, 256, MemFlags::ReadOnly)?;
    x.fill(2.)?;
    let y = Array::<f32>::with_flags(&queues, 256, MemFlags::WriteOnly)?;
    y.assign(&x * &x)?;
    y.wait()?;
    assert!(y.to_vec()?.iter().all(|&v| v == 4.));
    Ok(())
}

#[test]
fn empty_arrays() -> Result<(), ClError> {
    let queues = queues(2)?;
    for x in [Array::<f32>::empty(), Array::<f32>::new(&queues, 0)?] {
        assert!(x.is_empty());
        assert!(x.to_vec()?.is_empty());
        x.fill(1.)?;
        x.assign(&x + 1f32)?;
        x.assign(2f32)?;
        x.write(0, &[], true)?;
        x.read(0, &mut [], false)?.wait()?;
        x.wait()?;
        let y = x.try_clone()?;
        assert!(y.is_empty());
    }
    let mut x = Array::<f32>::empty();
    x.resize(0)?;
    assert!(matches!(x.resize(5), Err(ClError::NoDeviceAvailable)));
    assert!(matches!(Array::<f32>::new(&[], 5), Err(ClError::NoDeviceAvailable)));
    Ok(())
}

#[test]
fn rejected_operations() -> Result<(), ClError> {
    let queues = queues(2)?;
    let x = Array::<f32>::new(&queues, 100)?;
    let y = Array::<f32>::new(&queues, 40)?;

    assert!(matches!(x.assign(3f32), Err(ClError::ScalarExpression { len: 100 })));
    assert!(matches!(x.assign(clvec::sqrt(4f32)), Err(ClError::ScalarExpression { .. })));
    assert!(matches!(
        x.assign(&y + 1f32),
        Err(ClError::PartitionMismatch { device: 0, expected: 64, found: 32 })
    ));
    assert!(matches!(x.copy_from(&y), Err(ClError::PartitionMismatch { .. })));
    assert!(matches!(x.get(100), Err(ClError::IndexOutOfRange { index: 100, len: 100 })));
    assert!(matches!(x.set(200, 1.), Err(ClError::IndexOutOfRange { .. })));
    assert!(matches!(
        x.write(99, &[1., 2.], true),
        Err(ClError::RangeOutOfBounds { offset: 99, end: 101, len: 100 })
    ));
    let mut out = [0f32; 3];
    assert!(matches!(x.read(98, &mut out, true), Err(ClError::RangeOutOfBounds { .. })));
    Ok(())
}

#[test]
fn operands_on_other_queues() -> Result<(), ClError> {
    let a = queues(2)?;
    let b = queues(2)?;
    let x = Array::from_slice(&a, &[1f32; 100])?;
    let y = Array::from_slice(&b, &[2f32; 100])?;
    let z = Array::<f32>::new(&a, 100)?;
    assert_eq!(y.partition(), z.partition());

    assert!(matches!(z.assign(&x + &y), Err(ClError::QueueMismatch { device: 0 })));
    assert!(matches!(z.assign(clvec::sqrt(&y)), Err(ClError::QueueMismatch { .. })));
    assert!(matches!(z.copy_from(&y), Err(ClError::QueueMismatch { device: 0 })));
    assert!(matches!(y.try_clone()?.copy_from(&x), Err(ClError::QueueMismatch { .. })));

    // Same sizes on the first queue, but the operand has a second part
    let w = Array::from_slice(&a, &[4f32; 10])?;
    assert_eq!(w.partition(), [0, 10, 10]);
    let v = Array::<f32>::new(&a[..1], 10)?;
    assert!(matches!(v.assign(&w * 2f32), Err(ClError::QueueMismatch { device: 1 })));

    // Queues of one context in a different order are other queues too
    let swapped = [a[1].clone(), a[0].clone()];
    let s = Array::<f32>::new(&swapped, 100)?;
    assert_eq!(s.partition(), x.partition());
    assert!(matches!(s.assign(&x - 1f32), Err(ClError::QueueMismatch { device: 0 })));

    z.assign(&x + &x)?;
    assert_eq!(z.to_vec()?, vec![2f32; 100]);
    Ok(())
}

#[test]
fn multiple_contexts() -> Result<(), ClError> {
    let a = Context::host(&HostConfig::default())?;
    let b = Context::host(&HostConfig::default().with_devices(2))?;
    let queues = clvec::queue_list(&[a.clone(), b.clone()]);
    let data: Vec<f32> = (0..1000).map(|i| i as f32).collect();
    let x = Array::from_slice(&queues, &data)?;
    let z = Array::<f32>::new(&queues, 1000)?;
    z.assign(&x + &x)?;
    assert_eq!(z.to_vec()?, data.iter().map(|v| v + v).collect::<Vec<f32>>());
    assert_eq!(a.cached_kernels(), 1);
    assert_eq!(b.cached_kernels(), 1);
    Ok(())
}
