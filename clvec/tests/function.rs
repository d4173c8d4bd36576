use clvec::{Array, ClError, Context, ErrorStatus, HostConfig, Queue, UserFunction};

fn queues() -> Result<Vec<Queue>, ClError> {
    Ok(Context::host(&HostConfig::default().with_devices(2))?.queues())
}

#[test]
fn binary_function() -> Result<(), ClError> {
    let queues = queues()?;
    let axpy = UserFunction::<f32, (f32, f32)>::with_host("axpy2", "return 2 * prm1 + prm2;", |(x, y)| 2. * x + y)?;
    let x = Array::from_slice(&queues, &[1f32, 2., 3., 4.])?;
    let y = Array::from_slice(&queues, &[10f32, 20., 30., 40.])?;
    let z = Array::<f32>::new(&queues, 4)?;
    z.assign(axpy.call(&x, &y))?;
    assert_eq!(z.to_vec()?, [12., 24., 36., 48.]);

    // Arguments are expressions too
    z.assign(axpy.call(&x * 2f32, 1f32) - &x)?;
    assert_eq!(z.to_vec()?, [4., 7., 10., 13.]);
    assert_eq!(axpy.call(&x, &y).kernel_name(), "uf5axpy2vv");
    Ok(())
}

#[test]
fn mixed_types() -> Result<(), ClError> {
    let queues = queues()?;
    let greater =
        UserFunction::<i32, (f32, f32)>::with_host("greater", "return prm1 > prm2;", |(x, y)| i32::from(x > y))?;
    let x = Array::from_slice(&queues, &[1f32, 5., 3., 0.])?;
    let y = Array::from_slice(&queues, &[2f32, 2., 3., -1.])?;
    let z = Array::<i32>::new(&queues, 4)?;
    z.assign(greater.call(&x, &y))?;
    assert_eq!(z.to_vec()?, [0, 1, 0, 1]);
    Ok(())
}

#[test]
fn higher_arity() -> Result<(), ClError> {
    let queues = queues()?;
    let sum3 = UserFunction::<u32, (u32, u32, u32)>::with_host(
        "sum3",
        "return prm1 + prm2 + prm3;",
        |(a, b, c)| a + b + c,
    )?;
    let x = Array::from_slice(&queues, &[1u32, 2, 3])?;
    let z = Array::<u32>::new(&queues, 3)?;
    z.assign(sum3.call(&x, &x, 10u32))?;
    assert_eq!(z.to_vec()?, [12, 14, 16]);
    Ok(())
}

#[test]
fn distinct_functions_get_distinct_kernels() -> Result<(), ClError> {
    let context = Context::host(&HostConfig::default())?;
    let queues = context.queues();
    let double = UserFunction::<f64, (f64,)>::with_host("double_it", "return 2 * prm1;", |(x,)| 2. * x)?;
    let square = UserFunction::<f64, (f64,)>::with_host("square_it", "return prm1 * prm1;", |(x,)| x * x)?;
    let x = Array::from_slice(&queues, &[3f64; 20])?;
    let z = Array::<f64>::new(&queues, 20)?;
    z.assign(double.call(&x))?;
    assert_eq!(z.get(0)?, 6.);
    z.assign(square.call(&x))?;
    assert_eq!(z.get(0)?, 9.);
    assert_eq!(context.cached_kernels(), 2);
    Ok(())
}

#[test]
fn device_only_function_on_host() -> Result<(), ClError> {
    let queues = queues()?;
    let f = UserFunction::<f32, (f32,)>::new("device_only", "return prm1;")?;
    let x = Array::from_slice(&queues, &[1f32; 4])?;
    let z = Array::<f32>::new(&queues, 4)?;
    let result = z.assign(f.call(&x));
    assert!(matches!(result, Err(ClError::Backend(e)) if e.status == ErrorStatus::KernelCompilation));
    Ok(())
}

#[test]
fn registry_rejects_redefinition() -> Result<(), ClError> {
    let f = UserFunction::<f32, (f32,)>::new("same_name", "return prm1;")?;
    assert_eq!(f.name(), "same_name");
    assert!(UserFunction::<f32, (f32,)>::new("same_name", "return prm1;").is_ok());
    assert!(matches!(
        UserFunction::<f64, (f64,)>::new("same_name", "return prm1;"),
        Err(ClError::FunctionRedefined(_))
    ));
    assert!(matches!(
        UserFunction::<f32, (f32,)>::new("not an identifier", "return prm1;"),
        Err(ClError::InvalidFunctionName(_))
    ));
    Ok(())
}

#[test]
fn panicking_host_function() -> Result<(), ClError> {
    let queues = queues()?;
    let boom = UserFunction::<f32, (f32,)>::with_host("boom", "return prm1;", |(x,)| {
        assert!(x < 0., "boom on {x}");
        x
    })?;
    let x = Array::from_slice(&queues, &[1f32; 100])?;
    let z = Array::<f32>::new(&queues, 100)?;
    z.assign(boom.call(&x))?;
    let result = z.wait();
    assert!(matches!(result, Err(ClError::Backend(e)) if e.status == ErrorStatus::KernelLaunch));

    // The queues keep working after a failed launch
    z.assign(&x + 1f32)?;
    z.wait()?;
    assert_eq!(z.to_vec()?, vec![2f32; 100]);
    for queue in &queues {
        queue.finish()?;
    }
    Ok(())
}

#[test]
fn first_host_implementation_is_kept() -> Result<(), ClError> {
    let queues = queues()?;
    let x = Array::from_slice(&queues, &[3f32; 8])?;
    let z = Array::<f32>::new(&queues, 8)?;

    let device_only = UserFunction::<f32, (f32,)>::new("scaled", "return 3 * prm1;")?;
    assert!(matches!(z.assign(device_only.call(&x)), Err(ClError::Backend(_))));
    let tripled = UserFunction::<f32, (f32,)>::with_host("scaled", "return 3 * prm1;", |(x,)| 3. * x)?;
    let ignored = UserFunction::<f32, (f32,)>::with_host("scaled", "return 3 * prm1;", |(x,)| -x)?;
    let later = UserFunction::<f32, (f32,)>::new("scaled", "return 3 * prm1;")?;

    z.assign(tripled.call(&x))?;
    assert_eq!(z.to_vec()?, vec![9f32; 8]);
    for f in [&ignored, &later] {
        z.fill(0.)?;
        z.assign(f.call(&x))?;
        assert_eq!(z.to_vec()?, vec![9f32; 8]);
    }
    Ok(())
}
